//! API response types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::definition::TaskDefinition;
use crate::core::instance::{InstanceStatus, TaskInstance};
use crate::core::types::TaskName;
use crate::scheduler::{CompletionOutcome, SchedulerState};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Scheduler state response.
#[derive(Debug, Serialize)]
pub struct SchedulerStateResponse {
    pub state: SchedulerState,
    pub is_running: bool,
    pub is_paused: bool,
}

impl From<SchedulerState> for SchedulerStateResponse {
    fn from(state: SchedulerState) -> Self {
        Self {
            state,
            is_running: state == SchedulerState::Running,
            is_paused: state == SchedulerState::Paused,
        }
    }
}

/// Task definition summary.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub name: TaskName,
    pub cron: String,
    pub timezone: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub priority: u8,
    pub next_run: DateTime<Utc>,
    pub retired: bool,
}

impl From<TaskDefinition> for TaskResponse {
    fn from(def: TaskDefinition) -> Self {
        let retired = def.is_retired();
        Self {
            name: def.name,
            cron: def.cron,
            timezone: def.timezone,
            start_date: def.start_date,
            end_date: def.end_date,
            priority: def.priority.value(),
            next_run: def.next_run,
            retired,
        }
    }
}

/// List of task definitions response.
#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub count: usize,
}

/// Pending queue row.
#[derive(Debug, Serialize)]
pub struct InstanceResponse {
    pub id: String,
    pub task_name: TaskName,
    pub priority: u8,
    pub status: InstanceStatus,
    pub last_updated: DateTime<Utc>,
}

impl From<TaskInstance> for InstanceResponse {
    fn from(instance: TaskInstance) -> Self {
        Self {
            id: instance.id.to_string(),
            task_name: instance.task_name,
            priority: instance.priority.value(),
            status: instance.status,
            last_updated: instance.last_updated,
        }
    }
}

/// List of task instances response.
#[derive(Debug, Serialize)]
pub struct InstanceListResponse {
    pub instances: Vec<InstanceResponse>,
    pub count: usize,
}

/// Completion report response.
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub task_name: TaskName,
    pub outcome: CompletionOutcome,
}

/// In-flight queue contents.
#[derive(Debug, Serialize)]
pub struct InFlightResponse {
    pub tasks: Vec<TaskName>,
    pub count: usize,
    pub capacity: usize,
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
