//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use crate::core::schedule::ScheduleError;
use crate::queue::QueueError;
use crate::storage::StorageError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// In-flight queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// A stored cron expression could not be evaluated.
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

impl SchedulerError {
    /// Whether the failure is a transient store or broker outage.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Storage(StorageError::Unavailable(_))
                | SchedulerError::Queue(QueueError::Unavailable(_))
        )
    }
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

impl SchedulerState {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Paused => "paused",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Pause the periodic loops.
    Pause { response: oneshot::Sender<()> },
    /// Resume the periodic loops.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
