//! API integration tests.
//!
//! These tests drive the HTTP router in-process and check status codes and
//! JSON bodies.

use cronq::api::{ApiState, build_router, create_api_state};
use cronq::{InFlightQueue, InMemoryStorage, InstanceStatus, Priority, Scheduler, Storage, TaskName};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Create a test API state around a running scheduler with slow loops.
async fn create_test_state() -> ApiState<InMemoryStorage> {
    let storage = Arc::new(InMemoryStorage::new());
    let scheduler = Scheduler::with_storage(Arc::clone(&storage))
        .with_poll_interval(Duration::from_secs(3600))
        .with_janitor_interval(Duration::from_secs(3600))
        .with_max_parallelism(4);
    let queue = Arc::clone(scheduler.queue());
    let completion = scheduler.completion_handler();
    let capacity = scheduler.max_parallelism();

    let (handle, _task) = scheduler.start().await;

    create_api_state(handle, storage, queue, completion, capacity)
}

async fn send(
    state: &ApiState<InMemoryStorage>,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let router = build_router(state.clone());
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn task_body(name: &str, cron: &str) -> Value {
    json!({
        "name": name,
        "cron": cron,
        "end_date": (Utc::now() + chrono::Duration::days(1)).to_rfc3339(),
        "priority": 2,
    })
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let state = create_test_state().await;
    let (status, json) = send(&state, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Scheduler state endpoint follows pause and resume.
#[tokio::test]
async fn test_scheduler_pause_and_resume_endpoints() {
    let state = create_test_state().await;

    let (status, json) = send(&state, Method::GET, "/api/scheduler/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);
    assert_eq!(json["is_paused"], false);

    let (status, _) = send(&state, Method::POST, "/api/scheduler/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&state, Method::GET, "/api/scheduler/state", None).await;
    assert_eq!(json["state"], "paused");

    let (status, _) = send(&state, Method::POST, "/api/scheduler/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&state, Method::GET, "/api/scheduler/state", None).await;
    assert_eq!(json["state"], "running");
}

/// Test: Control endpoints report 503 once the scheduler has shut down.
#[tokio::test]
async fn test_pause_after_shutdown_is_unavailable() {
    let state = create_test_state().await;
    state.handle.shutdown().await.unwrap();

    let (status, json) = send(&state, Method::POST, "/api/scheduler/pause", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
}

/// Test: Creating a task returns the stored definition with its first run.
#[tokio::test]
async fn test_create_and_list_tasks() {
    let state = create_test_state().await;

    let (status, json) = send(
        &state,
        Method::POST,
        "/api/tasks",
        Some(task_body("report", "0 * * * *")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["name"], "report");
    assert_eq!(json["priority"], 2);
    assert_eq!(json["timezone"], "UTC");
    assert_eq!(json["retired"], false);
    assert!(json["next_run"].is_string());

    let (status, json) = send(&state, Method::GET, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["tasks"][0]["name"], "report");
}

/// Test: Creating a task with a bad cron expression is rejected with a reason code.
#[tokio::test]
async fn test_create_task_with_invalid_cron() {
    let state = create_test_state().await;

    let (status, json) = send(
        &state,
        Method::POST,
        "/api/tasks",
        Some(task_body("bad", "not a cron")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_cron");

    let (_, json) = send(&state, Method::GET, "/api/tasks", None).await;
    assert_eq!(json["count"], 0);
}

/// Test: A window that closes before the first occurrence is rejected.
#[tokio::test]
async fn test_create_task_with_unreachable_window() {
    let state = create_test_state().await;
    let body = json!({
        "name": "too_late",
        "cron": "0 0 1 1 *",
        "start_date": Utc::now().to_rfc3339(),
        "end_date": (Utc::now() + chrono::Duration::minutes(1)).to_rfc3339(),
    });

    let (status, json) = send(&state, Method::POST, "/api/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "unreachable_window");
}

/// Test: Out-of-range priorities are rejected.
#[tokio::test]
async fn test_create_task_with_invalid_priority() {
    let state = create_test_state().await;
    let mut body = task_body("p", "@hourly");
    body["priority"] = json!(0);

    let (status, json) = send(&state, Method::POST, "/api/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_priority");
}

/// Test: Duplicate names conflict and deletes of unknown names are 404.
#[tokio::test]
async fn test_duplicate_and_delete_tasks() {
    let state = create_test_state().await;
    let body = task_body("dup", "@hourly");

    let (status, _) = send(&state, Method::POST, "/api/tasks", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, json) = send(&state, Method::POST, "/api/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");

    let (status, _) = send(&state, Method::DELETE, "/api/tasks/dup", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(&state, Method::DELETE, "/api/tasks/dup", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

/// Test: Instances and the in-flight queue are visible, and completion is acknowledged.
#[tokio::test]
async fn test_instances_inflight_and_completion() {
    let state = create_test_state().await;
    let name = TaskName::new("job");

    state
        .storage
        .enqueue_instance(&name, Priority::DEFAULT, Utc::now())
        .await
        .unwrap();
    let claimed = state.storage.claim_pending(1, Utc::now()).await.unwrap();
    assert_eq!(claimed, [name.clone()]);
    assert!(state.queue.try_push(&name, 4).await.unwrap());

    let (status, json) = send(&state, Method::GET, "/api/instances", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["instances"][0]["task_name"], "job");
    assert_eq!(json["instances"][0]["status"], "running");

    let (status, json) = send(&state, Method::GET, "/api/inflight", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tasks"], json!(["job"]));
    assert_eq!(json["count"], 1);
    assert_eq!(json["capacity"], 4);

    let (status, json) = send(&state, Method::POST, "/api/instances/job/complete", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "completed");
    assert_eq!(
        state.storage.get_instance(&name).await.unwrap().status,
        InstanceStatus::Completed
    );

    let (status, json) = send(&state, Method::POST, "/api/instances/job/complete", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "stale");
}
