//! Scheduler engine implementation.
//!
//! The scheduler runs independent periodic loops that share only storage
//! and the in-flight queue:
//! - Due-task detection
//! - Admission into the in-flight queue
//! - Janitor cleanup and optional reclamation
//! - Optional in-process dispatch workers
//!
//! A command loop handles pause, resume and graceful shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::admission::AdmissionController;
use super::completion::CompletionHandler;
use super::detector::DueTaskDetector;
use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::janitor::Janitor;
use super::types::{SchedulerCommand, SchedulerError, SchedulerState};
use crate::dispatch::{Dispatcher, Executor};
use crate::events::EventBus;
use crate::queue::{InFlightQueue, InMemoryQueue};
use crate::storage::Storage;

/// Default interval of the detector and admission loops.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Default interval of the janitor loop.
pub const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(30);
/// Default admission capacity.
pub const DEFAULT_MAX_PARALLELISM: usize = 10;
/// Shortest loop interval the builder accepts.
pub const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(10);

fn clamp_interval(loop_name: &str, interval: Duration) -> Duration {
    if interval < MIN_LOOP_INTERVAL {
        tracing::warn!(
            loop_name,
            requested = ?interval,
            "Loop interval too short, using {:?}",
            MIN_LOOP_INTERVAL
        );
        return MIN_LOOP_INTERVAL;
    }
    interval
}

/// Main scheduler running the periodic loops.
pub struct Scheduler<S: Storage> {
    /// Schedule store and pending queue.
    storage: Arc<S>,
    /// In-flight queue.
    queue: Arc<dyn InFlightQueue>,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
    detector_interval: Duration,
    admission_interval: Duration,
    janitor_interval: Duration,
    /// Admission capacity.
    max_parallelism: usize,
    /// Reclaim instances running longer than this (None = never).
    running_deadline: Option<Duration>,
    /// In-process executor and its worker count (None = external workers).
    dispatch: Option<(Arc<dyn Executor>, usize)>,
    /// Graceful shutdown timeout (default: 30 seconds).
    shutdown_timeout: Duration,
}

impl<S: Storage + 'static> Scheduler<S> {
    /// Create a new scheduler with the given storage and an in-memory queue.
    pub fn new(storage: S) -> Self {
        Self::with_storage(Arc::new(storage))
    }

    /// Create a new scheduler with shared storage.
    pub fn with_storage(storage: Arc<S>) -> Self {
        Self {
            storage,
            queue: Arc::new(InMemoryQueue::new()),
            event_bus: Arc::new(EventBus::new()),
            detector_interval: DEFAULT_POLL_INTERVAL,
            admission_interval: DEFAULT_POLL_INTERVAL,
            janitor_interval: DEFAULT_JANITOR_INTERVAL,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            running_deadline: None,
            dispatch: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Set the in-flight queue.
    pub fn with_queue(mut self, queue: Arc<dyn InFlightQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Set the shared event bus.
    pub fn with_shared_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Set the detector interval (at least [`MIN_LOOP_INTERVAL`]).
    pub fn with_detector_interval(mut self, interval: Duration) -> Self {
        self.detector_interval = clamp_interval("detector", interval);
        self
    }

    /// Set the admission interval (at least [`MIN_LOOP_INTERVAL`]).
    pub fn with_admission_interval(mut self, interval: Duration) -> Self {
        self.admission_interval = clamp_interval("admission", interval);
        self
    }

    /// Set the detector and admission intervals together.
    pub fn with_poll_interval(self, interval: Duration) -> Self {
        self.with_detector_interval(interval)
            .with_admission_interval(interval)
    }

    /// Set the janitor interval (at least [`MIN_LOOP_INTERVAL`]).
    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = clamp_interval("janitor", interval);
        self
    }

    /// Set the admission capacity. A capacity of zero would never admit
    /// anything, so it is raised to one.
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        if max == 0 {
            tracing::warn!("max_parallelism of 0 admits nothing, using 1");
        }
        self.max_parallelism = max.max(1);
        self
    }

    /// Enable reclamation of instances running longer than `deadline`.
    pub fn with_running_deadline(mut self, deadline: Duration) -> Self {
        self.running_deadline = Some(deadline);
        self
    }

    /// Run `workers` in-process dispatch workers using `executor`.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>, workers: usize) -> Self {
        self.dispatch = Some((executor, workers));
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Get the storage.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Get the in-flight queue.
    pub fn queue(&self) -> &Arc<dyn InFlightQueue> {
        &self.queue
    }

    /// Admission capacity.
    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// A completion handler sharing this scheduler's storage and event bus.
    pub fn completion_handler(&self) -> CompletionHandler<S> {
        CompletionHandler::new(Arc::clone(&self.storage), Arc::clone(&self.event_bus))
    }

    /// Start the scheduler and return a handle for controlling it.
    pub async fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let loops = self.spawn_loops(&state, shutdown_rx);
        tracing::info!(
            loops = loops.len(),
            max_parallelism = self.max_parallelism,
            "Scheduler started"
        );

        let shutdown_timeout = self.shutdown_timeout;
        let scheduler_task = tokio::spawn(async move {
            run_commands(command_rx, state, shutdown_tx, loops, shutdown_timeout).await;
        });

        (handle, scheduler_task)
    }

    fn spawn_loops(
        &self,
        state: &Arc<RwLock<SchedulerState>>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut loops = Vec::new();

        let detector = Arc::new(DueTaskDetector::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.event_bus),
        ));
        loops.push(spawn_periodic(
            "detector",
            self.detector_interval,
            Arc::clone(state),
            shutdown.clone(),
            move || {
                let detector = Arc::clone(&detector);
                async move { detector.run_cycle(chrono::Utc::now()).await.map(|_| ()) }
            },
        ));

        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.queue),
            self.max_parallelism,
            Arc::clone(&self.event_bus),
        ));
        loops.push(spawn_periodic(
            "admission",
            self.admission_interval,
            Arc::clone(state),
            shutdown.clone(),
            move || {
                let admission = Arc::clone(&admission);
                async move { admission.run_cycle(chrono::Utc::now()).await.map(|_| ()) }
            },
        ));

        let janitor = Arc::new(
            Janitor::new(
                Arc::clone(&self.storage),
                Arc::clone(&self.queue),
                Arc::clone(&self.event_bus),
            )
            .with_running_deadline(self.running_deadline),
        );
        loops.push(spawn_periodic(
            "janitor",
            self.janitor_interval,
            Arc::clone(state),
            shutdown.clone(),
            move || {
                let janitor = Arc::clone(&janitor);
                async move { janitor.run_cycle(chrono::Utc::now()).await.map(|_| ()) }
            },
        ));

        if let Some((executor, workers)) = &self.dispatch
            && *workers > 0
        {
            let dispatcher = Dispatcher::new(
                Arc::clone(&self.queue),
                Arc::clone(executor),
                self.completion_handler(),
                Arc::clone(&self.event_bus),
            );
            loops.extend(dispatcher.spawn(*workers, shutdown));
        }

        loops
    }
}

/// Spawn a loop that runs `cycle` every `period` while the scheduler is running.
///
/// A failed cycle is logged and the loop carries on at the next tick.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    state: Arc<RwLock<SchedulerState>>,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), SchedulerError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *state.read().await != SchedulerState::Running {
                        continue;
                    }
                    if let Err(e) = cycle().await {
                        if e.is_unavailable() {
                            tracing::warn!(loop_name = name, error = %e, "Store unavailable, retrying next cycle");
                        } else {
                            tracing::error!(loop_name = name, error = %e, "Cycle failed");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!(loop_name = name, "Loop stopped");
    })
}

/// Command loop: owns the state transitions and the shutdown sequence.
async fn run_commands(
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
) {
    let mut loops = loops;
    while let Some(command) = command_rx.recv().await {
        match command {
            SchedulerCommand::Pause { response } => {
                *state.write().await = SchedulerState::Paused;
                tracing::info!("Scheduler paused");
                let _ = response.send(());
            }
            SchedulerCommand::Resume { response } => {
                *state.write().await = SchedulerState::Running;
                tracing::info!("Scheduler resumed");
                let _ = response.send(());
            }
            SchedulerCommand::Shutdown { response } => {
                *state.write().await = SchedulerState::Stopped;
                let _ = shutdown_tx.send(true);
                await_loops(std::mem::take(&mut loops), shutdown_timeout).await;
                let _ = response.send(());
                return;
            }
        }
    }

    // Every handle was dropped: stop the loops as if shut down.
    *state.write().await = SchedulerState::Stopped;
    let _ = shutdown_tx.send(true);
    await_loops(loops, shutdown_timeout).await;
}

/// Wait for all loops to finish, aborting any still running after the timeout.
async fn await_loops(loops: Vec<JoinHandle<()>>, timeout: Duration) {
    if loops.is_empty() {
        return;
    }

    tracing::info!(
        "Graceful shutdown: waiting for {} loop(s) to stop (timeout: {:?})",
        loops.len(),
        timeout
    );

    let start = tokio::time::Instant::now();
    let deadline = start + timeout;

    for handle in loops {
        let abort = handle.abort_handle();
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Loop ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    "Graceful shutdown timeout ({:?}) exceeded, aborting loop",
                    timeout
                );
                abort.abort();
            }
        }
    }

    tracing::info!("Scheduler stopped in {:?}", start.elapsed());
}
