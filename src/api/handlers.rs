//! API request handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::definition::DefinitionSpec;
use crate::core::types::{Priority, TaskName};
use crate::definitions;
use crate::queue::InFlightQueue;
use crate::scheduler::{CompletionHandler, SchedulerHandle};
use crate::storage::Storage;

use super::errors::ApiError;
use super::responses::{
    CompletionResponse, HealthResponse, InFlightResponse, InstanceListResponse, InstanceResponse,
    MessageResponse, SchedulerStateResponse, TaskListResponse, TaskResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<S: Storage> {
    pub handle: SchedulerHandle,
    pub storage: Arc<S>,
    pub queue: Arc<dyn InFlightQueue>,
    pub completion: CompletionHandler<S>,
    pub capacity: usize,
}

impl<S: Storage> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            storage: Arc::clone(&self.storage),
            queue: Arc::clone(&self.queue),
            completion: self.completion.clone(),
            capacity: self.capacity,
        }
    }
}

/// Body of a create-task request.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub cron: String,
    pub timezone: Option<String>,
    /// Defaults to the time of the request.
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: DateTime<Utc>,
    pub priority: Option<i64>,
}

impl CreateTaskRequest {
    fn into_spec(self, now: DateTime<Utc>) -> Result<DefinitionSpec, ApiError> {
        let priority = match self.priority {
            Some(value) => u8::try_from(value)
                .ok()
                .and_then(|v| Priority::new(v).ok())
                .ok_or_else(|| ApiError::BadRequest {
                    code: "invalid_priority",
                    message: format!(
                        "priority must be between {} and {}, got {}",
                        Priority::HIGHEST,
                        Priority::LOWEST,
                        value
                    ),
                })?,
            None => Priority::default(),
        };

        let mut spec = DefinitionSpec::new(
            self.name,
            self.cron,
            self.start_date.unwrap_or(now),
            self.end_date,
        )
        .with_priority(priority);
        if let Some(tz) = self.timezone {
            spec = spec.with_timezone(tz);
        }
        Ok(spec)
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get scheduler state.
pub async fn get_scheduler_state<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Json<SchedulerStateResponse> {
    let scheduler_state = state.handle.state().await;
    Json(SchedulerStateResponse::from(scheduler_state))
}

/// Pause the scheduler.
pub async fn pause_scheduler<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.pause().await?;
    Ok(Json(MessageResponse {
        message: "scheduler paused".to_string(),
    }))
}

/// Resume the scheduler.
pub async fn resume_scheduler<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.resume().await?;
    Ok(Json(MessageResponse {
        message: "scheduler resumed".to_string(),
    }))
}

/// List all task definitions.
pub async fn list_tasks<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let tasks: Vec<TaskResponse> = definitions::list(state.storage.as_ref())
        .await?
        .into_iter()
        .map(TaskResponse::from)
        .collect();
    let count = tasks.len();
    Ok(Json(TaskListResponse { tasks, count }))
}

/// Create a task definition.
pub async fn create_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let now = Utc::now();
    let spec = request.into_spec(now)?;
    let definition = definitions::create(state.storage.as_ref(), spec, now).await?;
    Ok((StatusCode::CREATED, Json(TaskResponse::from(definition))))
}

/// Delete a task definition.
pub async fn delete_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    definitions::delete(state.storage.as_ref(), &TaskName::new(name.as_str())).await?;
    Ok(Json(MessageResponse {
        message: format!("task '{}' deleted", name),
    }))
}

/// List pending queue rows.
pub async fn list_instances<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<InstanceListResponse>, ApiError> {
    let instances: Vec<InstanceResponse> = state
        .storage
        .list_instances()
        .await?
        .into_iter()
        .map(InstanceResponse::from)
        .collect();
    let count = instances.len();
    Ok(Json(InstanceListResponse { instances, count }))
}

/// Report that a task finished executing.
pub async fn complete_instance<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(name): Path<String>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let task_name = TaskName::new(name);
    let outcome = state.completion.mark_completed(&task_name).await?;
    Ok(Json(CompletionResponse { task_name, outcome }))
}

/// Show the in-flight queue.
pub async fn get_inflight<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<InFlightResponse>, ApiError> {
    let tasks = state.queue.snapshot().await?;
    Ok(Json(InFlightResponse {
        count: tasks.len(),
        tasks,
        capacity: state.capacity,
    }))
}
