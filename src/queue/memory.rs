//! In-memory in-flight queue.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{InFlightQueue, QueueError};
use crate::core::types::TaskName;

/// In-flight queue held in process memory.
///
/// Suitable for single-process deployments and tests; contents are lost on
/// restart.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    entries: Mutex<VecDeque<TaskName>>,
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InFlightQueue for InMemoryQueue {
    async fn len(&self) -> Result<usize, QueueError> {
        let entries = self.entries.lock().map_err(|_| QueueError::LockPoisoned)?;
        Ok(entries.len())
    }

    async fn try_push(&self, name: &TaskName, capacity: usize) -> Result<bool, QueueError> {
        let mut entries = self.entries.lock().map_err(|_| QueueError::LockPoisoned)?;
        if entries.len() >= capacity {
            return Ok(false);
        }
        entries.push_back(name.clone());
        Ok(true)
    }

    async fn pop(&self) -> Result<Option<TaskName>, QueueError> {
        let mut entries = self.entries.lock().map_err(|_| QueueError::LockPoisoned)?;
        Ok(entries.pop_front())
    }

    async fn snapshot(&self) -> Result<Vec<TaskName>, QueueError> {
        let entries = self.entries.lock().map_err(|_| QueueError::LockPoisoned)?;
        Ok(entries.iter().cloned().collect())
    }
}
