//! Core identifier types for the scheduler.
//!
//! `TaskName` is the business key shared by definitions, instances and the
//! in-flight queue. `InstanceId` is assigned by storage and never used for
//! deduplication.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique, human-readable name of a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

/// Storage-assigned identifier of a task instance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

/// Task priority. Lower values are admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

/// Error returned when a priority is outside the accepted range.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("priority must be between {min} and {max}, got {value}", min = Priority::HIGHEST.0, max = Priority::LOWEST.0)]
pub struct InvalidPriority {
    pub value: i64,
}

impl TaskName {
    /// Create a new TaskName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the name and return the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl InstanceId {
    /// Generate a new random InstanceId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an InstanceId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Priority {
    /// Most urgent priority.
    pub const HIGHEST: Priority = Priority(1);
    /// Least urgent priority.
    pub const LOWEST: Priority = Priority(5);
    /// Priority used when a definition does not specify one.
    pub const DEFAULT: Priority = Priority(3);

    /// Create a priority, rejecting values outside `1..=5`.
    pub fn new(value: u8) -> Result<Self, InvalidPriority> {
        if (Self::HIGHEST.0..=Self::LOWEST.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidPriority {
                value: i64::from(value),
            })
        }
    }

    /// Get the numeric value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<i64> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| InvalidPriority { value })
            .and_then(Self::new)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
