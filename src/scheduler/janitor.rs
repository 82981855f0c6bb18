//! Janitor: purges completed instances and, when a running deadline is
//! configured, returns stuck instances to pending.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::types::SchedulerError;
use crate::core::types::TaskName;
use crate::events::{Event, EventBus};
use crate::queue::InFlightQueue;
use crate::storage::Storage;

/// What one janitor cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JanitorReport {
    /// Completed instances deleted.
    pub purged: usize,
    /// Running instances returned to pending.
    pub reclaimed: Vec<TaskName>,
}

/// Periodic cleanup of the pending queue.
pub struct Janitor<S: Storage> {
    storage: Arc<S>,
    queue: Arc<dyn InFlightQueue>,
    running_deadline: Option<Duration>,
    event_bus: Arc<EventBus>,
}

impl<S: Storage> Janitor<S> {
    /// Create a janitor. Reclamation is off until a deadline is set.
    pub fn new(storage: Arc<S>, queue: Arc<dyn InFlightQueue>, event_bus: Arc<EventBus>) -> Self {
        Self {
            storage,
            queue,
            running_deadline: None,
            event_bus,
        }
    }

    /// Requeue instances running longer than `deadline` that are no longer
    /// in the in-flight queue.
    pub fn with_running_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.running_deadline = deadline;
        self
    }

    /// Run one janitor cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<JanitorReport, SchedulerError> {
        let purged = self.storage.purge_completed().await?;
        if purged > 0 {
            info!(purged, "Purged completed task instances");
            self.event_bus.emit(Event::instances_purged(purged)).await;
        }

        let reclaimed = self.reclaim(now).await?;
        Ok(JanitorReport { purged, reclaimed })
    }

    async fn reclaim(&self, now: DateTime<Utc>) -> Result<Vec<TaskName>, SchedulerError> {
        let Some(deadline) = self.running_deadline else {
            return Ok(Vec::new());
        };
        let Some(cutoff) = chrono::Duration::from_std(deadline)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
        else {
            return Ok(Vec::new());
        };

        let in_flight = self.queue.snapshot().await?;
        let reclaimed = self.storage.requeue_stale(cutoff, &in_flight, now).await?;
        if !reclaimed.is_empty() {
            let names: Vec<&str> = reclaimed.iter().map(|n| n.as_str()).collect();
            warn!(tasks = ?names, deadline = ?deadline, "Reclaimed instances stuck in running");
            self.event_bus
                .emit(Event::instances_reclaimed(reclaimed.clone()))
                .await;
        }
        Ok(reclaimed)
    }
}
