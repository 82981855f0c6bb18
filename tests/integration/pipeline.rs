//! End-to-end pipeline tests.
//!
//! Drive the detector, admission controller, completion handler and janitor
//! against shared storage and queue, first cycle by cycle with a fixed clock
//! and then through the running scheduler.

use chrono::{Duration as ChronoDuration, Utc};
use cronq::{
    AdmissionController, CompletionHandler, CompletionOutcome, DefinitionSpec, DueTaskDetector,
    Event, EventBus, InFlightQueue, InMemoryQueue, InMemoryStorage, InstanceStatus, Janitor,
    Priority, Scheduler, Storage, StorageError, TaskName, definitions, retired_sentinel,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{RecordingHandler, at, wait_for_instance_status};

struct Pipeline {
    storage: Arc<InMemoryStorage>,
    queue: Arc<dyn InFlightQueue>,
    detector: DueTaskDetector<InMemoryStorage>,
    admission: AdmissionController<InMemoryStorage>,
    completion: CompletionHandler<InMemoryStorage>,
    janitor: Janitor<InMemoryStorage>,
}

impl Pipeline {
    fn new(capacity: usize, bus: Arc<EventBus>) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let queue: Arc<dyn InFlightQueue> = Arc::new(InMemoryQueue::new());
        Self {
            detector: DueTaskDetector::new(Arc::clone(&storage), Arc::clone(&bus)),
            admission: AdmissionController::new(
                Arc::clone(&storage),
                Arc::clone(&queue),
                capacity,
                Arc::clone(&bus),
            ),
            completion: CompletionHandler::new(Arc::clone(&storage), Arc::clone(&bus)),
            janitor: Janitor::new(Arc::clone(&storage), Arc::clone(&queue), bus),
            storage,
            queue,
        }
    }

    async fn define(&self, name: &str, cron: &str, priority: u8) {
        let now = at(10, 0, 30);
        let spec = DefinitionSpec::new(
            name,
            cron,
            now - ChronoDuration::minutes(1),
            now + ChronoDuration::days(1),
        )
        .with_priority(Priority::new(priority).unwrap());
        definitions::create(self.storage.as_ref(), spec, now)
            .await
            .unwrap();
    }

    async fn status(&self, name: &str) -> Option<InstanceStatus> {
        match self.storage.get_instance(&TaskName::new(name)).await {
            Ok(instance) => Some(instance.status),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => panic!("unexpected storage error: {}", e),
        }
    }
}

/// Test: a definition fires at its minute boundary, is admitted, completed and purged.
#[tokio::test]
async fn test_single_task_lifecycle() {
    let bus = Arc::new(EventBus::new());
    let recorder = RecordingHandler::new();
    bus.register(recorder.clone()).await;
    let p = Pipeline::new(2, bus);

    p.define("A", "*/1 * * * *", 1).await;
    let def = p.storage.get_definition(&TaskName::new("A")).await.unwrap();
    assert_eq!(def.next_run, at(10, 1, 0));

    // Before the boundary nothing fires.
    let report = p.detector.run_cycle(at(10, 0, 45)).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(p.status("A").await, None);

    // Crossing the boundary records a pending instance and advances next_run.
    let report = p.detector.run_cycle(at(10, 1, 5)).await.unwrap();
    assert_eq!(report.fired, [TaskName::new("A")]);
    let instance = p.storage.get_instance(&TaskName::new("A")).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.priority.value(), 1);
    let def = p.storage.get_definition(&TaskName::new("A")).await.unwrap();
    assert_eq!(def.next_run, at(10, 2, 0));

    let report = p.admission.run_cycle(at(10, 1, 6)).await.unwrap();
    assert_eq!(report.admitted, [TaskName::new("A")]);
    assert_eq!(p.status("A").await, Some(InstanceStatus::Running));
    assert_eq!(p.queue.snapshot().await.unwrap(), [TaskName::new("A")]);

    // A worker takes the entry and acknowledges it.
    assert_eq!(p.queue.pop().await.unwrap(), Some(TaskName::new("A")));
    let outcome = p.completion.mark_completed(&TaskName::new("A")).await.unwrap();
    assert_eq!(outcome, CompletionOutcome::Completed);
    assert_eq!(p.status("A").await, Some(InstanceStatus::Completed));

    let report = p.janitor.run_cycle(at(10, 1, 30)).await.unwrap();
    assert_eq!(report.purged, 1);
    assert_eq!(p.status("A").await, None);

    // The next boundary fires again.
    let report = p.detector.run_cycle(at(10, 2, 1)).await.unwrap();
    assert_eq!(report.fired, [TaskName::new("A")]);
    assert_eq!(p.status("A").await, Some(InstanceStatus::Pending));

    let fired = recorder
        .count(|e| matches!(e, Event::TaskFired { duplicate: false, .. }))
        .await;
    assert_eq!(fired, 2);
    assert_eq!(
        recorder
            .count(|e| matches!(e, Event::InstancesPurged { count: 1, .. }))
            .await,
        1
    );
}

/// Test: capacity 2 with priorities [3,1,2] admits priorities 1 and 2 only.
#[tokio::test]
async fn test_priority_admission_under_capacity() {
    let p = Pipeline::new(2, Arc::new(EventBus::new()));
    p.define("low", "*/1 * * * *", 3).await;
    p.define("high", "*/1 * * * *", 1).await;
    p.define("mid", "*/1 * * * *", 2).await;

    let report = p.detector.run_cycle(at(10, 1, 0)).await.unwrap();
    assert_eq!(report.fired.len(), 3);

    let report = p.admission.run_cycle(at(10, 1, 1)).await.unwrap();
    assert_eq!(report.room, 2);
    assert_eq!(report.admitted, [TaskName::new("high"), TaskName::new("mid")]);

    assert_eq!(p.status("high").await, Some(InstanceStatus::Running));
    assert_eq!(p.status("mid").await, Some(InstanceStatus::Running));
    assert_eq!(p.status("low").await, Some(InstanceStatus::Pending));
    assert_eq!(
        p.queue.snapshot().await.unwrap(),
        [TaskName::new("high"), TaskName::new("mid")]
    );

    // A full queue admits nothing more.
    let report = p.admission.run_cycle(at(10, 1, 2)).await.unwrap();
    assert_eq!(report.room, 0);
    assert!(report.admitted.is_empty());

    // Draining one entry frees one slot for the remaining instance.
    let popped = p.queue.pop().await.unwrap().unwrap();
    p.completion.mark_completed(&popped).await.unwrap();
    let report = p.admission.run_cycle(at(10, 1, 3)).await.unwrap();
    assert_eq!(report.admitted, [TaskName::new("low")]);
    assert_eq!(p.queue.len().await.unwrap(), 2);
}

/// Test: firings while an instance is active collapse, and a completed row is revived.
#[tokio::test]
async fn test_firing_deduplicates_and_revives() {
    let p = Pipeline::new(1, Arc::new(EventBus::new()));
    p.define("A", "*/1 * * * *", 3).await;

    p.detector.run_cycle(at(10, 1, 0)).await.unwrap();
    p.admission.run_cycle(at(10, 1, 1)).await.unwrap();

    // Still running when the next minute fires.
    let report = p.detector.run_cycle(at(10, 2, 0)).await.unwrap();
    assert_eq!(report.duplicates, [TaskName::new("A")]);
    assert!(report.fired.is_empty());
    assert_eq!(p.status("A").await, Some(InstanceStatus::Running));
    assert_eq!(p.storage.list_instances().await.unwrap().len(), 1);

    // Completed but not yet purged: the next firing revives the same row.
    p.queue.pop().await.unwrap();
    p.completion.mark_completed(&TaskName::new("A")).await.unwrap();
    let report = p.detector.run_cycle(at(10, 3, 0)).await.unwrap();
    assert_eq!(report.fired, [TaskName::new("A")]);
    assert_eq!(p.status("A").await, Some(InstanceStatus::Pending));
    assert_eq!(p.storage.list_instances().await.unwrap().len(), 1);

    // A second completion for a name that is no longer running is stale.
    let outcome = p.completion.mark_completed(&TaskName::new("A")).await.unwrap();
    assert_eq!(outcome, CompletionOutcome::Stale);
    assert_eq!(p.status("A").await, Some(InstanceStatus::Pending));
}

/// Test: a definition past its end date is retired and never fires again.
#[tokio::test]
async fn test_definition_retires_at_end_date() {
    let p = Pipeline::new(2, Arc::new(EventBus::new()));
    let now = at(10, 0, 30);
    let spec = DefinitionSpec::new("short", "*/1 * * * *", now, at(10, 1, 30));
    definitions::create(p.storage.as_ref(), spec, now)
        .await
        .unwrap();

    let report = p.detector.run_cycle(at(10, 1, 10)).await.unwrap();
    assert_eq!(report.retired, [TaskName::new("short")]);
    assert_eq!(report.fired, [TaskName::new("short")]);

    let def = p
        .storage
        .get_definition(&TaskName::new("short"))
        .await
        .unwrap();
    assert_eq!(def.next_run, retired_sentinel());
    assert!(def.is_retired());

    let report = p.detector.run_cycle(at(10, 5, 0)).await.unwrap();
    assert!(report.is_empty());
}

/// Test: the running scheduler carries a task from firing to purge with an external worker.
#[tokio::test]
async fn test_running_scheduler_with_external_worker() {
    let storage = Arc::new(InMemoryStorage::new());
    let spec = DefinitionSpec::new(
        "tick",
        "@every 1s",
        Utc::now() - ChronoDuration::minutes(1),
        Utc::now() + ChronoDuration::days(1),
    );
    definitions::create(storage.as_ref(), spec, Utc::now())
        .await
        .unwrap();

    let scheduler = Scheduler::with_storage(Arc::clone(&storage))
        .with_poll_interval(Duration::from_millis(50))
        .with_janitor_interval(Duration::from_millis(50))
        .with_max_parallelism(1);
    let queue = Arc::clone(scheduler.queue());
    let completion = scheduler.completion_handler();
    let (handle, task) = scheduler.start().await;

    wait_for_instance_status(
        storage.as_ref(),
        "tick",
        InstanceStatus::Running,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(queue.len().await.unwrap(), 1);

    let name = queue.pop().await.unwrap().unwrap();
    assert_eq!(
        completion.mark_completed(&name).await.unwrap(),
        CompletionOutcome::Completed
    );

    // The next firing after completion revives or recreates the row.
    wait_for_instance_status(
        storage.as_ref(),
        "tick",
        InstanceStatus::Running,
        Duration::from_secs(5),
    )
    .await;
    assert!(queue.len().await.unwrap() <= 1);

    handle.shutdown().await.unwrap();
    let _ = task.await;
}
