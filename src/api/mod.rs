//! HTTP API module for the cronq scheduler.
//!
//! Provides REST endpoints for managing task definitions, inspecting the
//! pending and in-flight queues, reporting completions, and controlling the
//! scheduler.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::{ApiState, CreateTaskRequest};
pub use responses::*;

use axum::{
    Router,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::queue::InFlightQueue;
use crate::scheduler::{CompletionHandler, SchedulerHandle};
use crate::storage::Storage;

/// Configuration for the API server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

impl ApiConfig {
    /// Create a new API config with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Build the API router with all endpoints.
pub fn build_router<S: Storage + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Scheduler control
        .route(
            "/api/scheduler/state",
            get(handlers::get_scheduler_state::<S>),
        )
        .route("/api/scheduler/pause", post(handlers::pause_scheduler::<S>))
        .route(
            "/api/scheduler/resume",
            post(handlers::resume_scheduler::<S>),
        )
        // Definitions
        .route(
            "/api/tasks",
            get(handlers::list_tasks::<S>).post(handlers::create_task::<S>),
        )
        .route("/api/tasks/{name}", delete(handlers::delete_task::<S>))
        // Pending queue
        .route("/api/instances", get(handlers::list_instances::<S>))
        .route(
            "/api/instances/{name}/complete",
            post(handlers::complete_instance::<S>),
        )
        // In-flight queue
        .route("/api/inflight", get(handlers::get_inflight::<S>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from scheduler components.
pub fn create_api_state<S: Storage>(
    handle: SchedulerHandle,
    storage: Arc<S>,
    queue: Arc<dyn InFlightQueue>,
    completion: CompletionHandler<S>,
    capacity: usize,
) -> ApiState<S> {
    ApiState {
        handle,
        storage,
        queue,
        completion,
        capacity,
    }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: Storage + 'static>(
    config: ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config
        .socket_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
