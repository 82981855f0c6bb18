//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cronq::{Event, EventHandler, InstanceStatus, Storage, TaskInstance, TaskName};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A fixed instant on 2025-06-01.
pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, hour, minute, second)
        .single()
        .expect("valid test timestamp")
}

/// Wait for the instance of `name` to reach an expected status, polling storage.
///
/// This is more reliable than fixed sleeps since loop timing can vary.
/// Polls storage every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the instance reaches the expected status.
pub async fn wait_for_instance_status(
    storage: &dyn Storage,
    name: &str,
    expected: InstanceStatus,
    timeout: Duration,
) -> TaskInstance {
    let name = TaskName::new(name);
    let start = tokio::time::Instant::now();
    loop {
        let current = storage.get_instance(&name).await.ok();
        if let Some(instance) = &current
            && instance.status == expected
        {
            return instance.clone();
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for '{}' to reach {:?}, current: {:?}",
                name,
                expected,
                current.map(|i| i.status)
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Recording event handler for verifying events.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
