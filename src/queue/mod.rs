//! In-flight queue: the bounded hand-off list between admission and workers.
//!
//! An entry is a bare task name, and presence in the list is what marks an
//! instance as admitted. The list length is the global concurrency counter,
//! so pushes go through [`InFlightQueue::try_push`], which checks the bound
//! and appends in one atomic step.

mod memory;
#[cfg(feature = "redis")]
mod redis_queue;

pub use memory::InMemoryQueue;
#[cfg(feature = "redis")]
pub use redis_queue::RedisQueue;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::TaskName;

/// Default broker key for the in-flight list.
pub const DEFAULT_QUEUE_KEY: &str = "batch_run";

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker could not be reached.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// Queue lock was poisoned.
    #[error("queue lock poisoned")]
    LockPoisoned,

    /// Generic queue error.
    #[error("queue error: {0}")]
    Other(String),
}

/// Bounded FIFO list of admitted task names.
#[async_trait]
pub trait InFlightQueue: Send + Sync {
    /// Current number of admitted entries.
    async fn len(&self) -> Result<usize, QueueError>;

    /// Append `name` unless the list already holds `capacity` entries.
    /// Returns `false` when the bound refused the push.
    async fn try_push(&self, name: &TaskName, capacity: usize) -> Result<bool, QueueError>;

    /// Remove and return the oldest entry.
    async fn pop(&self) -> Result<Option<TaskName>, QueueError>;

    /// All entries, oldest first, without removing them.
    async fn snapshot(&self) -> Result<Vec<TaskName>, QueueError>;

    /// Whether the list is empty.
    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}
