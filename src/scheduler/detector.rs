//! Due-task detector.
//!
//! Each cycle finds definitions whose `next_run` has arrived inside their
//! validity window, records a firing in the pending queue, and rolls the
//! schedule forward from `now`. Definitions whose next occurrence lies past
//! `end_date` are parked at the retirement sentinel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::SchedulerError;
use crate::core::definition::{Rollover, TaskDefinition};
use crate::core::instance::EnqueueOutcome;
use crate::core::types::TaskName;
use crate::events::{Event, EventBus};
use crate::storage::Storage;

/// What one detector cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorReport {
    /// Names that got a new pending instance.
    pub fired: Vec<TaskName>,
    /// Names that were due but already had a pending or running instance.
    pub duplicates: Vec<TaskName>,
    /// Names parked at the retirement sentinel.
    pub retired: Vec<TaskName>,
    /// Names skipped because of a per-task failure.
    pub failed: Vec<TaskName>,
}

impl DetectorReport {
    /// Whether the cycle found nothing due.
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
            && self.duplicates.is_empty()
            && self.retired.is_empty()
            && self.failed.is_empty()
    }
}

/// Finds due definitions and turns them into firings.
pub struct DueTaskDetector<S: Storage> {
    storage: Arc<S>,
    event_bus: Arc<EventBus>,
}

impl<S: Storage> DueTaskDetector<S> {
    /// Create a detector over shared storage.
    pub fn new(storage: Arc<S>, event_bus: Arc<EventBus>) -> Self {
        Self { storage, event_bus }
    }

    /// Run one detection cycle at `now`.
    ///
    /// Only the due query itself can fail the cycle. Failures for a single
    /// definition are logged and the remaining definitions are still processed.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<DetectorReport, SchedulerError> {
        let due = self.storage.due_definitions(now).await?;
        let mut report = DetectorReport::default();

        for definition in due {
            let name = definition.name.clone();
            match self.fire(&definition, now).await {
                Ok((outcome, rollover)) => {
                    match outcome {
                        EnqueueOutcome::Inserted => report.fired.push(name.clone()),
                        EnqueueOutcome::Duplicate => report.duplicates.push(name.clone()),
                    }
                    if rollover == Rollover::Retire {
                        report.retired.push(name);
                    }
                }
                Err(e) => {
                    warn!(task = %name, error = %e, "Failed to process due task");
                    report.failed.push(name);
                }
            }
        }

        if !report.is_empty() {
            info!(
                fired = report.fired.len(),
                duplicates = report.duplicates.len(),
                retired = report.retired.len(),
                failed = report.failed.len(),
                "Detector cycle finished"
            );
        }
        Ok(report)
    }

    async fn fire(
        &self,
        definition: &TaskDefinition,
        now: DateTime<Utc>,
    ) -> Result<(EnqueueOutcome, Rollover), SchedulerError> {
        let name = &definition.name;

        let outcome = self
            .storage
            .enqueue_instance(name, definition.priority, now)
            .await?;
        let duplicate = outcome == EnqueueOutcome::Duplicate;
        if duplicate {
            debug!(task = %name, "Duplicate firing ignored");
        } else {
            debug!(task = %name, priority = %definition.priority, "Task fired");
        }
        self.event_bus
            .emit(Event::task_fired(name.clone(), definition.priority, duplicate))
            .await;

        let rollover = definition.rollover(now)?;
        self.storage.set_next_run(name, rollover.next_run()).await?;

        match rollover {
            Rollover::Continue(next) => debug!(task = %name, next_run = %next, "Schedule advanced"),
            Rollover::Retire => {
                info!(task = %name, end_date = %definition.end_date, "Task retired: no occurrences left in window");
                self.event_bus
                    .emit(Event::definition_retired(name.clone()))
                    .await;
            }
        }

        Ok((outcome, rollover))
    }
}
