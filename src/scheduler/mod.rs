//! Scheduling and admission engine.
//!
//! This module provides the periodic loops that detect due tasks, admit
//! pending instances into the bounded in-flight queue, record completions,
//! and clean up finished work.

mod admission;
mod completion;
mod detector;
mod engine;
mod handle;
mod janitor;
mod types;

pub use admission::{AdmissionController, AdmissionReport};
pub use completion::{CompletionHandler, CompletionOutcome};
pub use detector::{DetectorReport, DueTaskDetector};
pub use engine::{
    DEFAULT_JANITOR_INTERVAL, DEFAULT_MAX_PARALLELISM, DEFAULT_POLL_INTERVAL, MIN_LOOP_INTERVAL,
    Scheduler,
};
pub use handle::SchedulerHandle;
pub use janitor::{Janitor, JanitorReport};
pub use types::{SchedulerError, SchedulerState};
