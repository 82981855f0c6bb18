//! cronq - a cron-style task scheduler with priority admission.
//!
//! Recurring task definitions fire on their cron schedule into a pending
//! queue. An admission loop moves the most urgent pending instances into a
//! bounded in-flight queue, which workers drain and acknowledge.

pub mod api;
pub mod config;
pub mod core;
pub mod definitions;
pub mod dispatch;
pub mod events;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, SchedulerConfig, YamlLoader};
pub use core::definition::{DefinitionSpec, Rollover, TaskDefinition, retired_sentinel};
pub use core::instance::{EnqueueOutcome, InstanceStatus, TaskInstance};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::types::{InstanceId, InvalidPriority, Priority, TaskName};
pub use definitions::DefinitionError;
pub use dispatch::{Dispatcher, ExecutionError, Executor, LoggingExecutor};
pub use events::{Event, EventBus, EventHandler};
pub use queue::{DEFAULT_QUEUE_KEY, InFlightQueue, InMemoryQueue, QueueError};
#[cfg(feature = "redis")]
pub use queue::RedisQueue;
pub use scheduler::{
    AdmissionController, CompletionHandler, CompletionOutcome, DueTaskDetector, Janitor,
    Scheduler, SchedulerError, SchedulerHandle, SchedulerState,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryStorage, Storage, StorageError};
