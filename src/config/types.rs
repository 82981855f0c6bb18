//! Configuration type definitions.
//!
//! This module contains the type definitions for the YAML configuration:
//! loop intervals, admission capacity, backends, the HTTP listener and seed
//! task definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ConfigError;
use crate::api::ApiConfig;
use crate::core::definition::DefinitionSpec;
use crate::core::types::Priority;
use crate::queue::DEFAULT_QUEUE_KEY;

/// Scheduler configuration (cronq.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between due-task detection cycles.
    pub detector_interval_secs: u64,
    /// Seconds between admission cycles.
    pub admission_interval_secs: u64,
    /// Seconds between janitor cycles.
    pub janitor_interval_secs: u64,
    /// Maximum number of admitted instances at once.
    pub max_parallelism: usize,
    /// Reclaim instances running longer than this many seconds.
    pub running_deadline_secs: Option<u64>,
    /// Seconds to wait for loops to stop on shutdown.
    pub shutdown_timeout_secs: u64,
    /// In-process dispatch workers (0 = tasks are executed elsewhere).
    pub dispatch_workers: usize,
    /// Schedule store and pending queue backend.
    pub storage: StorageConfig,
    /// In-flight queue backend.
    pub queue: QueueConfig,
    /// HTTP API listener (disabled when absent).
    pub api: Option<ApiConfig>,
    /// Task definitions created at startup.
    pub tasks: Vec<TaskConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            detector_interval_secs: 60,
            admission_interval_secs: 60,
            janitor_interval_secs: 30,
            max_parallelism: 10,
            running_deadline_secs: None,
            shutdown_timeout_secs: 30,
            dispatch_workers: 0,
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            api: None,
            tasks: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Detector loop interval.
    pub fn detector_interval(&self) -> Duration {
        Duration::from_secs(self.detector_interval_secs)
    }

    /// Admission loop interval.
    pub fn admission_interval(&self) -> Duration {
        Duration::from_secs(self.admission_interval_secs)
    }

    /// Janitor loop interval.
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    /// Running deadline, if reclamation is enabled.
    pub fn running_deadline(&self) -> Option<Duration> {
        self.running_deadline_secs.map(Duration::from_secs)
    }

    /// Shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Set the detector and admission intervals together.
    pub fn set_poll_interval(&mut self, secs: u64) {
        self.detector_interval_secs = secs;
        self.admission_interval_secs = secs;
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("detector_interval_secs", self.detector_interval_secs),
            ("admission_interval_secs", self.admission_interval_secs),
            ("janitor_interval_secs", self.janitor_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    field
                )));
            }
        }

        if self.max_parallelism == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_parallelism must be greater than zero".into(),
            ));
        }

        if self.running_deadline_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "running_deadline_secs must be greater than zero".into(),
            ));
        }

        match &self.storage {
            StorageConfig::Sqlite { path } if path.is_empty() => {
                return Err(ConfigError::InvalidConfig("storage path cannot be empty".into()));
            }
            _ => {}
        }

        match &self.queue {
            QueueConfig::Redis { url, key } if url.is_empty() || key.is_empty() => {
                return Err(ConfigError::InvalidConfig(
                    "redis queue url and key cannot be empty".into(),
                ));
            }
            _ => {}
        }

        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !seen.insert(task.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task name: {}",
                    task.name
                )));
            }
        }

        Ok(())
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// In-flight queue configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueConfig {
    /// In-process queue (default).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// Redis list.
    #[serde(rename = "redis")]
    Redis {
        /// Connection URL.
        url: String,
        /// List key.
        #[serde(default = "default_queue_key")]
        key: String,
    },
}

fn default_queue_key() -> String {
    DEFAULT_QUEUE_KEY.to_string()
}

/// Seed task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task name.
    pub name: String,
    /// Cron expression or shortcut.
    pub cron: String,
    /// IANA timezone for the cron fields.
    pub timezone: Option<String>,
    /// First instant the task may fire (default: startup time).
    pub start_date: Option<DateTime<Utc>>,
    /// Last instant the task may fire.
    pub end_date: DateTime<Utc>,
    /// Admission priority, 1 (first) to 5 (last).
    pub priority: Option<u8>,
}

impl TaskConfig {
    /// Check the fields that can be checked without a clock.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(self.invalid("name cannot be empty"));
        }
        self.priority()?;
        if let Some(start) = self.start_date
            && start > self.end_date
        {
            return Err(self.invalid("start_date is after end_date"));
        }
        Ok(())
    }

    fn priority(&self) -> Result<Priority, ConfigError> {
        match self.priority {
            Some(p) => Priority::new(p).map_err(|e| self.invalid(e)),
            None => Ok(Priority::default()),
        }
    }

    fn invalid(&self, reason: impl ToString) -> ConfigError {
        ConfigError::InvalidTask {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Build a definition request, starting at `now` when no start date is set.
    pub fn to_spec(&self, now: DateTime<Utc>) -> Result<DefinitionSpec, ConfigError> {
        self.validate()?;
        let priority = self.priority()?;

        let mut spec = DefinitionSpec::new(
            self.name.as_str(),
            self.cron.as_str(),
            self.start_date.unwrap_or(now),
            self.end_date,
        )
        .with_priority(priority);
        if let Some(tz) = &self.timezone {
            spec = spec.with_timezone(tz.as_str());
        }
        Ok(spec)
    }
}
