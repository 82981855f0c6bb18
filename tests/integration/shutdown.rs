//! Graceful shutdown integration tests.
//!
//! Tests that verify the scheduler lets in-process workers finish the task
//! they are executing before it exits, and gives up after the timeout.

use chrono::{Duration as ChronoDuration, Utc};
use cronq::testing::RecordingExecutor;
use cronq::{
    DefinitionSpec, Event, EventBus, InMemoryStorage, InstanceStatus, Scheduler, SchedulerState,
    Storage, TaskName, definitions,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::RecordingHandler;

async fn storage_with_task(name: &str) -> Arc<InMemoryStorage> {
    let storage = Arc::new(InMemoryStorage::new());
    let spec = DefinitionSpec::new(
        name,
        "@every 1s",
        Utc::now() - ChronoDuration::minutes(1),
        Utc::now() + ChronoDuration::days(1),
    );
    definitions::create(storage.as_ref(), spec, Utc::now())
        .await
        .unwrap();
    storage
}

async fn wait_for_start(executor: &RecordingExecutor) {
    for _ in 0..250 {
        if executor.call_count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("executor was never called");
}

/// Test: Graceful shutdown waits for an executing task to finish and be acknowledged.
#[tokio::test]
async fn test_graceful_shutdown_waits_for_execution() {
    let storage = storage_with_task("slow").await;
    let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_millis(300)));
    let event_bus = EventBus::new();
    let handler = RecordingHandler::new();
    event_bus.register(handler.clone()).await;

    let scheduler = Scheduler::with_storage(Arc::clone(&storage))
        .with_event_bus(event_bus)
        .with_poll_interval(Duration::from_millis(20))
        .with_janitor_interval(Duration::from_secs(3600))
        .with_executor(executor.clone(), 1)
        .with_shutdown_timeout(Duration::from_secs(5)); // Generous timeout

    let (handle, scheduler_task) = scheduler.start().await;

    wait_for_start(&executor).await;
    assert!(
        executor.executed().is_empty(),
        "Task should not have finished yet"
    );

    // Trigger shutdown while the task is executing
    let shutdown_start = std::time::Instant::now();
    handle.shutdown().await.unwrap();
    let shutdown_duration = shutdown_start.elapsed();
    let _ = scheduler_task.await;

    assert_eq!(executor.executed(), [TaskName::new("slow")]);
    assert!(
        shutdown_duration >= Duration::from_millis(100),
        "Shutdown should have waited for the execution. Duration: {:?}",
        shutdown_duration
    );
    assert_eq!(handle.state().await, SchedulerState::Stopped);

    // The attempt was acknowledged before the worker stopped.
    let instance = storage.get_instance(&TaskName::new("slow")).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(
        handler
            .count(|e| matches!(e, Event::ExecutionFinished { error: None, .. }))
            .await,
        1
    );
}

/// Test: Graceful shutdown gives up on executions that outlive the timeout.
#[tokio::test]
async fn test_graceful_shutdown_timeout_exceeded() {
    let storage = storage_with_task("very_slow").await;
    let executor = Arc::new(RecordingExecutor::new().with_delay(Duration::from_secs(2)));

    // Set a short shutdown timeout (200ms) that will be exceeded
    let scheduler = Scheduler::with_storage(Arc::clone(&storage))
        .with_poll_interval(Duration::from_millis(20))
        .with_janitor_interval(Duration::from_secs(3600))
        .with_executor(executor.clone(), 1)
        .with_shutdown_timeout(Duration::from_millis(200));

    let (handle, scheduler_task) = scheduler.start().await;
    wait_for_start(&executor).await;

    let shutdown_start = std::time::Instant::now();
    handle.shutdown().await.unwrap();
    let _ = scheduler_task.await;

    assert!(
        shutdown_start.elapsed() < Duration::from_secs(1),
        "Shutdown should not wait for the full execution"
    );
    assert!(executor.executed().is_empty(), "Execution should have been aborted");

    // The instance stays running; only reclamation can return it to pending.
    let instance = storage
        .get_instance(&TaskName::new("very_slow"))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);
}

/// Test: Dropping every handle stops the scheduler.
#[tokio::test]
async fn test_dropping_handles_stops_scheduler() {
    let scheduler = Scheduler::new(InMemoryStorage::new())
        .with_poll_interval(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(1));
    let (handle, scheduler_task) = scheduler.start().await;
    drop(handle);

    let result = tokio::time::timeout(Duration::from_secs(3), scheduler_task).await;
    assert!(result.is_ok(), "Scheduler task should finish once handles are gone");
}
