//! In-process dispatch of admitted tasks.
//!
//! Workers pop names from the in-flight queue, hand them to an [`Executor`],
//! and acknowledge every attempt through the completion handler, whether it
//! succeeded or not. Deployments with external workers leave the dispatcher
//! off and acknowledge over the HTTP API instead.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::types::TaskName;
use crate::events::{Event, EventBus};
use crate::queue::InFlightQueue;
use crate::scheduler::CompletionHandler;
use crate::storage::Storage;

/// How long an idle worker waits before polling an empty queue again.
const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(500);

/// Errors returned by an executor.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The unit of work ran and failed.
    #[error("execution failed: {0}")]
    Failed(String),

    /// The unit of work could not be started.
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Runs the unit of work behind a task name.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute the task. The outcome is reported but not retried.
    async fn execute(&self, task: &TaskName) -> Result<(), ExecutionError>;
}

/// Executor that only logs the task name.
pub struct LoggingExecutor;

#[async_trait]
impl Executor for LoggingExecutor {
    async fn execute(&self, task: &TaskName) -> Result<(), ExecutionError> {
        info!(task = %task, "Running task");
        Ok(())
    }
}

/// Pool of workers draining the in-flight queue.
pub struct Dispatcher<S: Storage> {
    queue: Arc<dyn InFlightQueue>,
    executor: Arc<dyn Executor>,
    completion: CompletionHandler<S>,
    event_bus: Arc<EventBus>,
    idle_poll: Duration,
}

impl<S: Storage + 'static> Dispatcher<S> {
    /// Create a dispatcher.
    pub fn new(
        queue: Arc<dyn InFlightQueue>,
        executor: Arc<dyn Executor>,
        completion: CompletionHandler<S>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            queue,
            executor,
            completion,
            event_bus,
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }

    /// Set how long idle workers wait between polls.
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Spawn `workers` worker tasks that stop once `shutdown` flips to true.
    pub fn spawn(self, workers: usize, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let dispatcher = Arc::new(self);
        (0..workers)
            .map(|worker| {
                let dispatcher = Arc::clone(&dispatcher);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { dispatcher.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    /// Pop and run one task. Returns `false` when the queue was empty.
    pub async fn dispatch_one(&self) -> Result<bool, crate::queue::QueueError> {
        let Some(name) = self.queue.pop().await? else {
            return Ok(false);
        };
        self.run(name).await;
        Ok(true)
    }

    async fn run_worker(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker, "Dispatch worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.dispatch_one().await {
                Ok(ran) => !ran,
                Err(e) => {
                    warn!(worker, error = %e, "Failed to pop from in-flight queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_poll) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
        debug!(worker, "Dispatch worker stopped");
    }

    async fn run(&self, name: TaskName) {
        let start = Instant::now();
        let result = self.executor.execute(&name).await;
        let duration = start.elapsed();

        let error = match result {
            Ok(()) => {
                debug!(task = %name, duration = ?duration, "Execution finished");
                None
            }
            Err(e) => {
                warn!(task = %name, duration = ?duration, error = %e, "Execution failed");
                Some(e.to_string())
            }
        };
        self.event_bus
            .emit(Event::execution_finished(name.clone(), duration, error))
            .await;

        if let Err(e) = self.completion.mark_completed(&name).await {
            warn!(task = %name, error = %e, "Failed to record completion");
        }
    }
}
