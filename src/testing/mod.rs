//! Testing utilities for users of the cronq library.
//!
//! This module provides helpers for exercising the scheduler loops:
//!
//! - [`FailingStorage`]: in-memory storage with switchable failures
//! - [`FlakyQueue`]: in-memory in-flight queue with switchable failures
//! - [`RecordingExecutor`]: an executor that records what it ran

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::core::definition::TaskDefinition;
use crate::core::instance::{EnqueueOutcome, TaskInstance};
use crate::core::types::{Priority, TaskName};
use crate::dispatch::{ExecutionError, Executor};
use crate::queue::{InFlightQueue, InMemoryQueue, QueueError};
use crate::storage::{InMemoryStorage, Storage, StorageError};

/// A storage wrapper that can be configured to fail specific operations.
///
/// Wraps [`InMemoryStorage`] and selectively returns errors. Setting the
/// whole store unavailable makes every call fail with
/// [`StorageError::Unavailable`].
///
/// # Example
///
/// ```
/// use cronq::testing::FailingStorage;
///
/// let storage = FailingStorage::new();
/// storage.set_unavailable(true);
/// storage.fail_set_next_run_for("broken");
/// ```
#[derive(Default)]
pub struct FailingStorage {
    inner: InMemoryStorage,
    unavailable: AtomicBool,
    fail_release: AtomicBool,
    fail_set_next_run: RwLock<HashSet<TaskName>>,
}

impl FailingStorage {
    /// Create a wrapper around an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `release_running` fail.
    pub fn set_fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Make `set_next_run` fail for one task name.
    pub fn fail_set_next_run_for(&self, name: impl Into<TaskName>) {
        if let Ok(mut names) = self.fail_set_next_run.write() {
            names.insert(name.into());
        }
    }

    /// The wrapped store, for assertions that bypass injected failures.
    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    fn check(&self, operation: &str) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "injected {} error",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn insert_definition(&self, definition: TaskDefinition) -> Result<(), StorageError> {
        self.check("insert_definition")?;
        self.inner.insert_definition(definition).await
    }

    async fn get_definition(&self, name: &TaskName) -> Result<TaskDefinition, StorageError> {
        self.check("get_definition")?;
        self.inner.get_definition(name).await
    }

    async fn list_definitions(&self) -> Result<Vec<TaskDefinition>, StorageError> {
        self.check("list_definitions")?;
        self.inner.list_definitions().await
    }

    async fn delete_definition(&self, name: &TaskName) -> Result<(), StorageError> {
        self.check("delete_definition")?;
        self.inner.delete_definition(name).await
    }

    async fn due_definitions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, StorageError> {
        self.check("due_definitions")?;
        self.inner.due_definitions(now).await
    }

    async fn set_next_run(
        &self,
        name: &TaskName,
        next_run: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check("set_next_run")?;
        let targeted = self
            .fail_set_next_run
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains(name);
        if targeted {
            return Err(StorageError::Other(format!(
                "injected set_next_run error for {}",
                name
            )));
        }
        self.inner.set_next_run(name, next_run).await
    }

    async fn enqueue_instance(
        &self,
        name: &TaskName,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StorageError> {
        self.check("enqueue_instance")?;
        self.inner.enqueue_instance(name, priority, now).await
    }

    async fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError> {
        self.check("claim_pending")?;
        self.inner.claim_pending(limit, now).await
    }

    async fn release_running(
        &self,
        names: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.check("release_running")?;
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(StorageError::Other("injected release_running error".into()));
        }
        self.inner.release_running(names, now).await
    }

    async fn complete_instance(
        &self,
        name: &TaskName,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.check("complete_instance")?;
        self.inner.complete_instance(name, now).await
    }

    async fn purge_completed(&self) -> Result<usize, StorageError> {
        self.check("purge_completed")?;
        self.inner.purge_completed().await
    }

    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError> {
        self.check("requeue_stale")?;
        self.inner.requeue_stale(cutoff, exclude, now).await
    }

    async fn get_instance(&self, name: &TaskName) -> Result<TaskInstance, StorageError> {
        self.check("get_instance")?;
        self.inner.get_instance(name).await
    }

    async fn list_instances(&self) -> Result<Vec<TaskInstance>, StorageError> {
        self.check("list_instances")?;
        self.inner.list_instances().await
    }
}

/// An in-flight queue wrapper that can be configured to fail pushes.
///
/// Wraps [`InMemoryQueue`]. Pushes for names registered with
/// [`FlakyQueue::fail_push_for`] return [`QueueError::Unavailable`] without
/// touching the list.
#[derive(Default)]
pub struct FlakyQueue {
    inner: InMemoryQueue,
    unavailable: AtomicBool,
    fail_push: RwLock<HashSet<TaskName>>,
}

impl FlakyQueue {
    /// Create a wrapper around an empty in-memory queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make pushes of one task name fail.
    pub fn fail_push_for(&self, name: impl Into<TaskName>) {
        if let Ok(mut names) = self.fail_push.write() {
            names.insert(name.into());
        }
    }

    fn check(&self, operation: &str) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(format!(
                "injected {} error",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InFlightQueue for FlakyQueue {
    async fn len(&self) -> Result<usize, QueueError> {
        self.check("len")?;
        self.inner.len().await
    }

    async fn try_push(&self, name: &TaskName, capacity: usize) -> Result<bool, QueueError> {
        self.check("try_push")?;
        let targeted = self
            .fail_push
            .read()
            .map_err(|_| QueueError::LockPoisoned)?
            .contains(name);
        if targeted {
            return Err(QueueError::Unavailable(format!(
                "injected push error for {}",
                name
            )));
        }
        self.inner.try_push(name, capacity).await
    }

    async fn pop(&self) -> Result<Option<TaskName>, QueueError> {
        self.check("pop")?;
        self.inner.pop().await
    }

    async fn snapshot(&self) -> Result<Vec<TaskName>, QueueError> {
        self.check("snapshot")?;
        self.inner.snapshot().await
    }
}

/// An executor that records every task it runs.
///
/// Tasks registered with [`RecordingExecutor::fail_for`] return an error
/// after being recorded, which lets tests check that failed executions are
/// still acknowledged.
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<TaskName>>,
    failing: RwLock<HashSet<TaskName>>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl RecordingExecutor {
    /// Create an executor that succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every execution.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make executions of one task name fail.
    pub fn fail_for(&self, name: impl Into<TaskName>) {
        if let Ok(mut names) = self.failing.write() {
            names.insert(name.into());
        }
    }

    /// Names executed so far, in order.
    pub fn executed(&self) -> Vec<TaskName> {
        self.executed
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }

    /// Number of executions so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, task: &TaskName) -> Result<(), ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(task.clone());
        }

        let fails = self
            .failing
            .read()
            .map(|names| names.contains(task))
            .unwrap_or(false);
        if fails {
            return Err(ExecutionError::Failed(format!(
                "intentional test failure for {}",
                task
            )));
        }
        Ok(())
    }
}
