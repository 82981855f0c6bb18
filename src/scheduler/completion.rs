//! Completion handler: the execution layer's acknowledgement path.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::types::TaskName;
use crate::events::{Event, EventBus};
use crate::storage::{Storage, StorageError};

/// Result of a completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionOutcome {
    /// The running instance was marked completed.
    Completed,
    /// No running instance matched; the signal was ignored.
    Stale,
}

/// Marks running instances completed.
pub struct CompletionHandler<S: Storage> {
    storage: Arc<S>,
    event_bus: Arc<EventBus>,
}

impl<S: Storage> Clone for CompletionHandler<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            event_bus: Arc::clone(&self.event_bus),
        }
    }
}

impl<S: Storage> CompletionHandler<S> {
    /// Create a completion handler over shared storage.
    pub fn new(storage: Arc<S>, event_bus: Arc<EventBus>) -> Self {
        Self { storage, event_bus }
    }

    /// Transition the running instance for `name` to completed.
    ///
    /// A signal for a name with no running instance (never admitted, or
    /// already completed) changes nothing and reports `Stale`.
    pub async fn mark_completed(&self, name: &TaskName) -> Result<CompletionOutcome, StorageError> {
        if self.storage.complete_instance(name, Utc::now()).await? {
            info!(task = %name, "Task instance completed");
            self.event_bus
                .emit(Event::task_completed(name.clone()))
                .await;
            Ok(CompletionOutcome::Completed)
        } else {
            warn!(task = %name, "Stale completion: no running instance");
            self.event_bus
                .emit(Event::stale_completion(name.clone()))
                .await;
            Ok(CompletionOutcome::Stale)
        }
    }
}
