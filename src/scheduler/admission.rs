//! Admission controller.
//!
//! Moves the most urgent pending instances into the in-flight queue while
//! the queue is below `capacity`. Claiming is one conditional bulk update in
//! storage, and every push is bounded, so neither a second controller nor a
//! slow worker can push the queue past capacity. Names whose push fails are
//! released back to pending in the same cycle.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::types::SchedulerError;
use crate::core::types::TaskName;
use crate::events::{Event, EventBus};
use crate::queue::InFlightQueue;
use crate::storage::Storage;

/// What one admission cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionReport {
    /// Free slots observed at the start of the cycle.
    pub room: usize,
    /// Names pushed onto the in-flight queue, in admission order.
    pub admitted: Vec<TaskName>,
    /// Claimed names returned to pending because their push failed.
    pub rolled_back: Vec<TaskName>,
}

/// Admits pending instances into the bounded in-flight queue.
pub struct AdmissionController<S: Storage> {
    storage: Arc<S>,
    queue: Arc<dyn InFlightQueue>,
    capacity: usize,
    event_bus: Arc<EventBus>,
}

impl<S: Storage> AdmissionController<S> {
    /// Create a controller admitting up to `capacity` concurrent instances.
    pub fn new(
        storage: Arc<S>,
        queue: Arc<dyn InFlightQueue>,
        capacity: usize,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            storage,
            queue,
            capacity,
            event_bus,
        }
    }

    /// The concurrency cap.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run one admission cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<AdmissionReport, SchedulerError> {
        let in_flight = self.queue.len().await?;
        let room = self.capacity.saturating_sub(in_flight);
        let mut report = AdmissionReport {
            room,
            ..Default::default()
        };
        if room == 0 {
            debug!(in_flight, capacity = self.capacity, "In-flight queue full, skipping admission");
            return Ok(report);
        }

        let claimed = self.storage.claim_pending(room, now).await?;
        let mut failed: Vec<(TaskName, String)> = Vec::new();

        for name in claimed {
            match self.queue.try_push(&name, self.capacity).await {
                Ok(true) => {
                    debug!(task = %name, "Task admitted");
                    self.event_bus
                        .emit(Event::task_admitted(name.clone()))
                        .await;
                    report.admitted.push(name);
                }
                Ok(false) => failed.push((name, "in-flight queue at capacity".to_string())),
                Err(e) => {
                    warn!(task = %name, error = %e, "Failed to push admitted task");
                    failed.push((name, e.to_string()));
                }
            }
        }

        if !failed.is_empty() {
            let names: Vec<TaskName> = failed.iter().map(|(name, _)| name.clone()).collect();
            match self.storage.release_running(&names, now).await {
                Ok(released) => {
                    warn!(released, "Rolled back claimed tasks that could not be pushed");
                    for (name, reason) in failed {
                        self.event_bus
                            .emit(Event::admission_rolled_back(name, reason))
                            .await;
                    }
                }
                Err(e) => {
                    let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
                    error!(tasks = ?names, error = %e, "Failed to roll back claimed tasks; they stay running until reclaimed");
                    return Err(e.into());
                }
            }
            report.rolled_back = names;
        }

        if !report.admitted.is_empty() || !report.rolled_back.is_empty() {
            info!(
                admitted = report.admitted.len(),
                rolled_back = report.rolled_back.len(),
                room,
                "Admission cycle finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instance::InstanceStatus;
    use crate::core::types::Priority;
    use crate::queue::InMemoryQueue;
    use crate::storage::InMemoryStorage;
    use crate::testing::{FailingStorage, FlakyQueue};
    use chrono::Duration;

    async fn enqueue<T: Storage>(storage: &T, name: &str, priority: u8, at: DateTime<Utc>) {
        storage
            .enqueue_instance(&TaskName::new(name), Priority::new(priority).unwrap(), at)
            .await
            .unwrap();
    }

    async fn status<T: Storage>(storage: &T, name: &str) -> InstanceStatus {
        storage
            .get_instance(&TaskName::new(name))
            .await
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_admits_by_priority_up_to_capacity() {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(InMemoryQueue::new());
        let controller =
            AdmissionController::new(Arc::clone(&storage), queue.clone(), 2, Arc::new(EventBus::new()));
        let now = Utc::now();
        enqueue(storage.as_ref(), "p3", 3, now).await;
        enqueue(storage.as_ref(), "p1", 1, now).await;
        enqueue(storage.as_ref(), "p2", 2, now).await;

        let report = controller.run_cycle(now).await.unwrap();
        assert_eq!(report.room, 2);
        assert_eq!(report.admitted, [TaskName::new("p1"), TaskName::new("p2")]);

        assert_eq!(status(storage.as_ref(), "p1").await, InstanceStatus::Running);
        assert_eq!(status(storage.as_ref(), "p2").await, InstanceStatus::Running);
        assert_eq!(status(storage.as_ref(), "p3").await, InstanceStatus::Pending);
        assert_eq!(
            queue.snapshot().await.unwrap(),
            [TaskName::new("p1"), TaskName::new("p2")]
        );
    }

    #[tokio::test]
    async fn test_full_queue_admits_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(InMemoryQueue::new());
        let controller =
            AdmissionController::new(Arc::clone(&storage), queue.clone(), 1, Arc::new(EventBus::new()));
        let now = Utc::now();
        queue.try_push(&TaskName::new("busy"), 1).await.unwrap();
        enqueue(storage.as_ref(), "waiting", 1, now).await;

        let report = controller.run_cycle(now).await.unwrap();
        assert_eq!(report, AdmissionReport::default());
        assert_eq!(status(storage.as_ref(), "waiting").await, InstanceStatus::Pending);
    }

    #[tokio::test]
    async fn test_single_slot_goes_to_most_urgent_then_oldest() {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(InMemoryQueue::new());
        let controller =
            AdmissionController::new(Arc::clone(&storage), queue.clone(), 1, Arc::new(EventBus::new()));
        let now = Utc::now();
        enqueue(storage.as_ref(), "newer", 2, now).await;
        enqueue(storage.as_ref(), "older", 2, now - Duration::minutes(5)).await;
        enqueue(storage.as_ref(), "relaxed", 5, now - Duration::hours(1)).await;

        let report = controller.run_cycle(now).await.unwrap();
        assert_eq!(report.admitted, [TaskName::new("older")]);
    }

    #[tokio::test]
    async fn test_queue_never_exceeds_capacity_across_cycles() {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(InMemoryQueue::new());
        let controller =
            AdmissionController::new(Arc::clone(&storage), queue.clone(), 3, Arc::new(EventBus::new()));
        let now = Utc::now();
        for i in 0..10 {
            enqueue(storage.as_ref(), &format!("t{}", i), (i % 5 + 1) as u8, now).await;
        }

        for _ in 0..4 {
            controller.run_cycle(now).await.unwrap();
            assert!(queue.len().await.unwrap() <= 3);
        }

        // Drain one slot and admit again.
        queue.pop().await.unwrap();
        let report = controller.run_cycle(now).await.unwrap();
        assert_eq!(report.admitted.len(), 1);
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_push_rolls_back_to_pending() {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(FlakyQueue::new());
        queue.fail_push_for("b");
        let controller =
            AdmissionController::new(Arc::clone(&storage), queue.clone(), 5, Arc::new(EventBus::new()));
        let now = Utc::now();
        enqueue(storage.as_ref(), "a", 1, now).await;
        enqueue(storage.as_ref(), "b", 2, now).await;
        enqueue(storage.as_ref(), "c", 3, now).await;

        let report = controller.run_cycle(now).await.unwrap();
        assert_eq!(report.admitted, [TaskName::new("a"), TaskName::new("c")]);
        assert_eq!(report.rolled_back, [TaskName::new("b")]);

        assert_eq!(status(storage.as_ref(), "b").await, InstanceStatus::Pending);
        assert_eq!(
            queue.snapshot().await.unwrap(),
            [TaskName::new("a"), TaskName::new("c")]
        );
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let storage = Arc::new(FailingStorage::new());
        storage.set_fail_release(true);
        let queue = Arc::new(FlakyQueue::new());
        queue.fail_push_for("a");
        let controller =
            AdmissionController::new(Arc::clone(&storage), queue, 5, Arc::new(EventBus::new()));
        enqueue(storage.as_ref(), "a", 1, Utc::now()).await;

        assert!(controller.run_cycle(Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_queue_fails_cycle_without_claiming() {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(FlakyQueue::new());
        queue.set_unavailable(true);
        let controller =
            AdmissionController::new(Arc::clone(&storage), queue, 5, Arc::new(EventBus::new()));
        enqueue(storage.as_ref(), "a", 1, Utc::now()).await;

        let err = controller.run_cycle(Utc::now()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(status(storage.as_ref(), "a").await, InstanceStatus::Pending);
    }
}
