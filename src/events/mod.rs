//! Lifecycle events and event handling.
//!
//! Every loop reports what it did through an [`EventBus`], giving handlers a
//! view of firings, admissions, completions and cleanup without coupling the
//! loops to each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::types::{Priority, TaskName};

/// Lifecycle events emitted by the scheduler loops.
#[derive(Debug, Clone)]
pub enum Event {
    /// A definition came due and a firing was recorded.
    TaskFired {
        task_name: TaskName,
        priority: Priority,
        /// `true` when a pending or running instance already existed.
        duplicate: bool,
        timestamp: DateTime<Utc>,
    },

    /// A definition ran past its end date and was parked at the sentinel.
    DefinitionRetired {
        task_name: TaskName,
        timestamp: DateTime<Utc>,
    },

    /// An instance moved to running and was pushed onto the in-flight queue.
    TaskAdmitted {
        task_name: TaskName,
        timestamp: DateTime<Utc>,
    },

    /// A claimed instance could not be pushed and was returned to pending.
    AdmissionRolledBack {
        task_name: TaskName,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A running instance was marked completed.
    TaskCompleted {
        task_name: TaskName,
        timestamp: DateTime<Utc>,
    },

    /// A completion arrived for a name with no running instance.
    StaleCompletion {
        task_name: TaskName,
        timestamp: DateTime<Utc>,
    },

    /// The janitor deleted completed instances.
    InstancesPurged {
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Running instances past their deadline were returned to pending.
    InstancesReclaimed {
        task_names: Vec<TaskName>,
        timestamp: DateTime<Utc>,
    },

    /// An in-process executor finished a task.
    ExecutionFinished {
        task_name: TaskName,
        duration: Duration,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::TaskFired { timestamp, .. }
            | Event::DefinitionRetired { timestamp, .. }
            | Event::TaskAdmitted { timestamp, .. }
            | Event::AdmissionRolledBack { timestamp, .. }
            | Event::TaskCompleted { timestamp, .. }
            | Event::StaleCompletion { timestamp, .. }
            | Event::InstancesPurged { timestamp, .. }
            | Event::InstancesReclaimed { timestamp, .. }
            | Event::ExecutionFinished { timestamp, .. } => *timestamp,
        }
    }

    /// The task this event concerns, if it concerns a single task.
    pub fn task_name(&self) -> Option<&TaskName> {
        match self {
            Event::TaskFired { task_name, .. }
            | Event::DefinitionRetired { task_name, .. }
            | Event::TaskAdmitted { task_name, .. }
            | Event::AdmissionRolledBack { task_name, .. }
            | Event::TaskCompleted { task_name, .. }
            | Event::StaleCompletion { task_name, .. }
            | Event::ExecutionFinished { task_name, .. } => Some(task_name),
            Event::InstancesPurged { .. } | Event::InstancesReclaimed { .. } => None,
        }
    }

    /// Create a TaskFired event.
    pub fn task_fired(task_name: TaskName, priority: Priority, duplicate: bool) -> Self {
        Event::TaskFired {
            task_name,
            priority,
            duplicate,
            timestamp: Utc::now(),
        }
    }

    /// Create a DefinitionRetired event.
    pub fn definition_retired(task_name: TaskName) -> Self {
        Event::DefinitionRetired {
            task_name,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskAdmitted event.
    pub fn task_admitted(task_name: TaskName) -> Self {
        Event::TaskAdmitted {
            task_name,
            timestamp: Utc::now(),
        }
    }

    /// Create an AdmissionRolledBack event.
    pub fn admission_rolled_back(task_name: TaskName, reason: impl Into<String>) -> Self {
        Event::AdmissionRolledBack {
            task_name,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(task_name: TaskName) -> Self {
        Event::TaskCompleted {
            task_name,
            timestamp: Utc::now(),
        }
    }

    /// Create a StaleCompletion event.
    pub fn stale_completion(task_name: TaskName) -> Self {
        Event::StaleCompletion {
            task_name,
            timestamp: Utc::now(),
        }
    }

    /// Create an InstancesPurged event.
    pub fn instances_purged(count: usize) -> Self {
        Event::InstancesPurged {
            count,
            timestamp: Utc::now(),
        }
    }

    /// Create an InstancesReclaimed event.
    pub fn instances_reclaimed(task_names: Vec<TaskName>) -> Self {
        Event::InstancesReclaimed {
            task_names,
            timestamp: Utc::now(),
        }
    }

    /// Create an ExecutionFinished event.
    pub fn execution_finished(
        task_name: TaskName,
        duration: Duration,
        error: Option<String>,
    ) -> Self {
        Event::ExecutionFinished {
            task_name,
            duration,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
