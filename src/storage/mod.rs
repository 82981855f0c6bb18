//! Storage abstraction for task definitions and task instances.
//!
//! One backend holds both the schedule store (definitions and their cron
//! progress) and the pending queue (instances keyed by task name). Every
//! status transition is a single conditional operation keyed on the expected
//! prior status, so concurrent loops cannot double-admit or double-complete.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::definition::TaskDefinition;
use crate::core::instance::{EnqueueOutcome, TaskInstance};
use crate::core::types::{Priority, TaskName};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Storage trait for the schedule store and the pending queue.
#[async_trait]
pub trait Storage: Send + Sync {
    // Definition operations

    /// Insert a new definition. Fails with `DuplicateKey` if the name exists.
    async fn insert_definition(&self, definition: TaskDefinition) -> Result<(), StorageError>;

    /// Get a definition by name.
    async fn get_definition(&self, name: &TaskName) -> Result<TaskDefinition, StorageError>;

    /// List all definitions ordered by name.
    async fn list_definitions(&self) -> Result<Vec<TaskDefinition>, StorageError>;

    /// Delete a definition by name.
    async fn delete_definition(&self, name: &TaskName) -> Result<(), StorageError>;

    /// Definitions with `next_run <= now` and `end_date >= now`.
    async fn due_definitions(&self, now: DateTime<Utc>)
    -> Result<Vec<TaskDefinition>, StorageError>;

    /// Persist a definition's next firing.
    async fn set_next_run(
        &self,
        name: &TaskName,
        next_run: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    // Instance operations

    /// Record a firing for `name`.
    ///
    /// Inserts a pending instance when none exists, revives a completed one,
    /// and is a no-op (`Duplicate`) when a pending or running one exists.
    async fn enqueue_instance(
        &self,
        name: &TaskName,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StorageError>;

    /// Atomically select up to `limit` pending instances in admission order
    /// and mark them running. Returns the claimed names in that order.
    async fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError>;

    /// Move the named instances from running back to pending.
    /// Returns how many rows changed.
    async fn release_running(
        &self,
        names: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;

    /// Transition the running instance for `name` to completed.
    /// Returns `false` if no running instance matched.
    async fn complete_instance(
        &self,
        name: &TaskName,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Delete all completed instances. Returns how many were removed.
    async fn purge_completed(&self) -> Result<usize, StorageError>;

    /// Move running instances last updated before `cutoff` back to pending,
    /// skipping any name in `exclude`. Returns the requeued names.
    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError>;

    /// Get the instance for a name.
    async fn get_instance(&self, name: &TaskName) -> Result<TaskInstance, StorageError>;

    /// List all instances in admission order.
    async fn list_instances(&self) -> Result<Vec<TaskInstance>, StorageError>;
}
