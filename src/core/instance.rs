//! Task instances tracked by the pending queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::{InstanceId, Priority, TaskName};

/// Lifecycle status of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Waiting for admission.
    Pending,
    /// Admitted into the in-flight queue.
    Running,
    /// Execution finished; awaiting purge.
    Completed,
}

impl InstanceStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
        }
    }

    /// Whether the instance still counts against the per-name dedup key.
    pub fn is_active(&self) -> bool {
        !matches!(self, InstanceStatus::Completed)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "running" => Ok(InstanceStatus::Running),
            "completed" => Ok(InstanceStatus::Completed),
            other => Err(format!("unknown instance status: {}", other)),
        }
    }
}

/// One unit of pending, running or completed work derived from a firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Storage-assigned row identity.
    pub id: InstanceId,
    /// Name of the definition that fired.
    pub task_name: TaskName,
    /// Priority copied from the definition at enqueue time.
    pub priority: Priority,
    /// Current status.
    pub status: InstanceStatus,
    /// Last status transition.
    pub last_updated: DateTime<Utc>,
}

impl TaskInstance {
    /// Create a pending instance.
    pub fn pending(task_name: TaskName, priority: Priority, now: DateTime<Utc>) -> Self {
        Self {
            id: InstanceId::new(),
            task_name,
            priority,
            status: InstanceStatus::Pending,
            last_updated: now,
        }
    }

    /// Admission order: priority, then oldest first, then name.
    pub fn admission_key(&self) -> (Priority, DateTime<Utc>, &TaskName) {
        (self.priority, self.last_updated, &self.task_name)
    }
}

/// Result of recording a firing in the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending instance was created (or a completed one revived).
    Inserted,
    /// A pending or running instance already exists for this name.
    Duplicate,
}
