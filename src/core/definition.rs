//! Task definitions and their cron progress.
//!
//! A definition fires on its cron schedule while `next_run` lies inside the
//! validity window `[start_date, end_date]`. Once the schedule runs past
//! `end_date`, `next_run` is parked at the retirement sentinel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::schedule::{Schedule, ScheduleError};
use super::types::{Priority, TaskName};
use crate::storage::StorageError;

/// Unix timestamp of 2099-01-01T00:00:00Z.
const RETIRED_TIMESTAMP: i64 = 4_070_908_800;

/// Far-future `next_run` marking a definition with no occurrences left.
pub fn retired_sentinel() -> DateTime<Utc> {
    DateTime::from_timestamp(RETIRED_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Errors returned by definition operations.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The cron expression or timezone could not be parsed.
    #[error("invalid cron: {0}")]
    InvalidCron(#[source] ScheduleError),

    /// The first occurrence falls after the end of the validity window.
    #[error("no occurrence before end date {end_date}{}", first_run.map(|t| format!(" (first would be {})", t)).unwrap_or_default())]
    UnreachableWindow {
        first_run: Option<DateTime<Utc>>,
        end_date: DateTime<Utc>,
    },

    /// A definition with this name already exists.
    #[error("task already exists: {0}")]
    DuplicateName(String),

    /// No definition with this name exists.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl DefinitionError {
    /// Machine-readable rejection reason.
    pub fn reason(&self) -> &'static str {
        match self {
            DefinitionError::InvalidCron(_) => "invalid_cron",
            DefinitionError::UnreachableWindow { .. } => "unreachable_window",
            DefinitionError::DuplicateName(_) => "duplicate_name",
            DefinitionError::NotFound(_) => "not_found",
            DefinitionError::Storage(_) => "storage_error",
        }
    }
}

/// Request to register a recurring task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSpec {
    /// Unique task name.
    pub name: TaskName,
    /// Cron expression or shortcut.
    pub cron: String,
    /// IANA timezone the cron fields are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// First instant the task may fire.
    pub start_date: DateTime<Utc>,
    /// Last instant the task may fire.
    pub end_date: DateTime<Utc>,
    /// Admission priority (lower first).
    #[serde(default)]
    pub priority: Priority,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl DefinitionSpec {
    /// Create a request evaluated in UTC with default priority.
    pub fn new(
        name: impl Into<TaskName>,
        cron: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            timezone: default_timezone(),
            start_date,
            end_date,
            priority: Priority::default(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Compute the first firing strictly after `max(now, start_date)`.
    ///
    /// Fails with `InvalidCron` for a malformed expression or timezone, and with
    /// `UnreachableWindow` when that first firing falls after `end_date`.
    pub fn first_run(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DefinitionError> {
        let schedule = Schedule::with_timezone(&self.cron, &self.timezone)
            .map_err(DefinitionError::InvalidCron)?;
        let from = now.max(self.start_date);

        match schedule.next_after(from) {
            Ok(first) if first <= self.end_date => Ok(first),
            Ok(first) => Err(DefinitionError::UnreachableWindow {
                first_run: Some(first),
                end_date: self.end_date,
            }),
            Err(ScheduleError::NoMoreOccurrences) => Err(DefinitionError::UnreachableWindow {
                first_run: None,
                end_date: self.end_date,
            }),
            Err(e) => Err(DefinitionError::InvalidCron(e)),
        }
    }

    /// Validate the request and build the stored definition.
    pub fn into_definition(self, now: DateTime<Utc>) -> Result<TaskDefinition, DefinitionError> {
        let next_run = self.first_run(now)?;
        Ok(TaskDefinition {
            name: self.name,
            cron: self.cron,
            timezone: self.timezone,
            start_date: self.start_date,
            end_date: self.end_date,
            priority: self.priority,
            next_run,
            created_at: now,
        })
    }
}

/// Stored task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task name.
    pub name: TaskName,
    /// Cron expression or shortcut.
    pub cron: String,
    /// Timezone the cron fields are evaluated in.
    pub timezone: String,
    /// Start of the validity window.
    pub start_date: DateTime<Utc>,
    /// End of the validity window.
    pub end_date: DateTime<Utc>,
    /// Admission priority copied onto each instance.
    pub priority: Priority,
    /// Next scheduled firing, or the retirement sentinel.
    pub next_run: DateTime<Utc>,
    /// When the definition was registered.
    pub created_at: DateTime<Utc>,
}

/// Where a definition goes after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollover {
    /// Schedule continues at the given instant.
    Continue(DateTime<Utc>),
    /// The next occurrence lies past `end_date`; park at the sentinel.
    Retire,
}

impl Rollover {
    /// The `next_run` value to persist.
    pub fn next_run(&self) -> DateTime<Utc> {
        match self {
            Rollover::Continue(next) => *next,
            Rollover::Retire => retired_sentinel(),
        }
    }
}

impl TaskDefinition {
    /// Whether the definition fires at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run <= now && self.end_date >= now
    }

    /// Whether the schedule has been parked at the sentinel.
    pub fn is_retired(&self) -> bool {
        self.next_run >= retired_sentinel()
    }

    /// Compute the rollover after a firing observed at `now`.
    pub fn rollover(&self, now: DateTime<Utc>) -> Result<Rollover, ScheduleError> {
        let schedule = Schedule::with_timezone(&self.cron, &self.timezone)?;
        match schedule.next_after(now) {
            Ok(next) if next <= self.end_date => Ok(Rollover::Continue(next)),
            Ok(_) | Err(ScheduleError::NoMoreOccurrences) => Ok(Rollover::Retire),
            Err(e) => Err(e),
        }
    }
}
