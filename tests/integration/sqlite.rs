//! SQLite storage integration tests.
//!
//! Verify that definitions and queue state survive a restart and that the
//! loops behave the same on the durable backend.

use cronq::{
    AdmissionController, DefinitionSpec, DueTaskDetector, EventBus, InFlightQueue, InMemoryQueue,
    InstanceStatus, Janitor, Priority, SqliteStorage, Storage, TaskName, definitions,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::common::at;

fn spec(name: &str, priority: u8) -> DefinitionSpec {
    DefinitionSpec::new(
        name,
        "*/5 * * * *",
        at(9, 0, 0),
        at(23, 0, 0),
    )
    .with_priority(Priority::new(priority).unwrap())
}

/// Test: Definitions and pending instances survive closing and reopening the database.
#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cronq.db");

    {
        let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
        definitions::create(storage.as_ref(), spec("report", 2), at(10, 0, 0))
            .await
            .unwrap();

        let detector = DueTaskDetector::new(Arc::clone(&storage), Arc::new(EventBus::new()));
        let report = detector.run_cycle(at(10, 5, 1)).await.unwrap();
        assert_eq!(report.fired, [TaskName::new("report")]);
        storage.close().await;
    }

    let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
    let def = storage
        .get_definition(&TaskName::new("report"))
        .await
        .unwrap();
    assert_eq!(def.next_run, at(10, 10, 0));
    assert_eq!(def.priority.value(), 2);

    let instance = storage
        .get_instance(&TaskName::new("report"))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.last_updated, at(10, 5, 1));

    // A duplicate create after restart is rejected rather than overwriting.
    let err = definitions::create(storage.as_ref(), spec("report", 1), at(10, 6, 0))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "duplicate_name");
}

/// Test: Priority admission and purge run the same way on SQLite.
#[tokio::test]
async fn test_admission_and_purge_on_sqlite() {
    let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
    let queue: Arc<dyn InFlightQueue> = Arc::new(InMemoryQueue::new());
    let bus = Arc::new(EventBus::new());

    for (name, priority) in [("c", 3), ("a", 1), ("b", 2)] {
        definitions::create(storage.as_ref(), spec(name, priority), at(10, 0, 0))
            .await
            .unwrap();
    }

    let detector = DueTaskDetector::new(Arc::clone(&storage), Arc::clone(&bus));
    let admission =
        AdmissionController::new(Arc::clone(&storage), Arc::clone(&queue), 2, Arc::clone(&bus));
    let janitor = Janitor::new(Arc::clone(&storage), Arc::clone(&queue), bus);

    detector.run_cycle(at(10, 5, 0)).await.unwrap();
    let report = admission.run_cycle(at(10, 5, 1)).await.unwrap();
    assert_eq!(report.admitted, [TaskName::new("a"), TaskName::new("b")]);
    assert_eq!(
        storage.get_instance(&TaskName::new("c")).await.unwrap().status,
        InstanceStatus::Pending
    );

    let name = queue.pop().await.unwrap().unwrap();
    assert_eq!(name, TaskName::new("a"));
    assert!(storage.complete_instance(&name, at(10, 5, 30)).await.unwrap());

    let report = janitor.run_cycle(at(10, 6, 0)).await.unwrap();
    assert_eq!(report.purged, 1);
    let remaining: Vec<String> = storage
        .list_instances()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.task_name.into_string())
        .collect();
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&"a".to_string()));
}

/// Test: Controllers racing over one file database never admit a row twice or overfill the queue.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_controllers() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SqliteStorage::new(dir.path().join("cronq.db")).await.unwrap());
    let queue: Arc<dyn InFlightQueue> = Arc::new(InMemoryQueue::new());
    let bus = Arc::new(EventBus::new());
    let capacity = 25;

    for i in 0..40u32 {
        let priority = Priority::new((i % 5) as u8 + 1).unwrap();
        storage
            .enqueue_instance(&TaskName::new(format!("task_{:02}", i)), priority, at(10, 0, i))
            .await
            .unwrap();
    }

    let controllers: Vec<_> = (0..4)
        .map(|_| {
            Arc::new(AdmissionController::new(
                Arc::clone(&storage),
                Arc::clone(&queue),
                capacity,
                Arc::clone(&bus),
            ))
        })
        .collect();

    let mut cycles = Vec::new();
    for round in 0..3 {
        for controller in &controllers {
            let controller = Arc::clone(controller);
            cycles.push(tokio::spawn(async move {
                controller.run_cycle(at(10, 5, round)).await
            }));
        }
    }
    for cycle in cycles {
        let result = cycle.await.unwrap();
        assert!(result.is_ok(), "admission cycle failed: {:?}", result.err());
    }

    let admitted = queue.snapshot().await.unwrap();
    let unique: HashSet<&TaskName> = admitted.iter().collect();
    assert_eq!(unique.len(), admitted.len(), "a task was admitted twice");
    assert!(admitted.len() <= capacity);

    let running = storage
        .list_instances()
        .await
        .unwrap()
        .into_iter()
        .filter(|i| i.status == InstanceStatus::Running)
        .count();
    assert_eq!(running, admitted.len());

    // One more cycle tops the queue up to capacity.
    controllers[0].run_cycle(at(10, 6, 0)).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), capacity);
    storage.close().await;
}
