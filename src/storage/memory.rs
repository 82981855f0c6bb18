//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{Storage, StorageError};
use crate::core::definition::TaskDefinition;
use crate::core::instance::{EnqueueOutcome, InstanceStatus, TaskInstance};
use crate::core::types::{InstanceId, Priority, TaskName};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access. Each conditional
/// transition runs under a single write lock, which makes it atomic.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    definitions: RwLock<BTreeMap<TaskName, TaskDefinition>>,
    instances: RwLock<HashMap<TaskName, TaskInstance>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_admission(mut instances: Vec<TaskInstance>) -> Vec<TaskInstance> {
    instances.sort_by(|a, b| a.admission_key().cmp(&b.admission_key()));
    instances
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_definition(&self, definition: TaskDefinition) -> Result<(), StorageError> {
        let mut defs = self
            .definitions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if defs.contains_key(&definition.name) {
            return Err(StorageError::DuplicateKey(format!(
                "definition: {}",
                definition.name
            )));
        }
        defs.insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn get_definition(&self, name: &TaskName) -> Result<TaskDefinition, StorageError> {
        let defs = self
            .definitions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        defs.get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("definition: {}", name)))
    }

    async fn list_definitions(&self) -> Result<Vec<TaskDefinition>, StorageError> {
        let defs = self
            .definitions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(defs.values().cloned().collect())
    }

    async fn delete_definition(&self, name: &TaskName) -> Result<(), StorageError> {
        let mut defs = self
            .definitions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        defs.remove(name)
            .ok_or_else(|| StorageError::NotFound(format!("definition: {}", name)))?;
        Ok(())
    }

    async fn due_definitions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, StorageError> {
        let defs = self
            .definitions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(defs.values().filter(|d| d.is_due(now)).cloned().collect())
    }

    async fn set_next_run(
        &self,
        name: &TaskName,
        next_run: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut defs = self
            .definitions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let def = defs
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(format!("definition: {}", name)))?;
        def.next_run = next_run;
        Ok(())
    }

    async fn enqueue_instance(
        &self,
        name: &TaskName,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StorageError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        match instances.get_mut(name) {
            Some(existing) if existing.status.is_active() => Ok(EnqueueOutcome::Duplicate),
            Some(completed) => {
                completed.status = InstanceStatus::Pending;
                completed.priority = priority;
                completed.last_updated = now;
                completed.id = InstanceId::new();
                Ok(EnqueueOutcome::Inserted)
            }
            None => {
                instances.insert(
                    name.clone(),
                    TaskInstance::pending(name.clone(), priority, now),
                );
                Ok(EnqueueOutcome::Inserted)
            }
        }
    }

    async fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut instances = self
            .instances
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut pending: Vec<&TaskInstance> = instances
            .values()
            .filter(|i| i.status == InstanceStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.admission_key().cmp(&b.admission_key()));
        let claimed: Vec<TaskName> = pending
            .into_iter()
            .take(limit)
            .map(|i| i.task_name.clone())
            .collect();

        for name in &claimed {
            if let Some(instance) = instances.get_mut(name) {
                instance.status = InstanceStatus::Running;
                instance.last_updated = now;
            }
        }

        Ok(claimed)
    }

    async fn release_running(
        &self,
        names: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut released = 0;
        for name in names {
            if let Some(instance) = instances.get_mut(name)
                && instance.status == InstanceStatus::Running
            {
                instance.status = InstanceStatus::Pending;
                instance.last_updated = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn complete_instance(
        &self,
        name: &TaskName,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        match instances.get_mut(name) {
            Some(instance) if instance.status == InstanceStatus::Running => {
                instance.status = InstanceStatus::Completed;
                instance.last_updated = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_completed(&self) -> Result<usize, StorageError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let before = instances.len();
        instances.retain(|_, i| i.status != InstanceStatus::Completed);
        Ok(before - instances.len())
    }

    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut requeued = Vec::new();
        for instance in instances.values_mut() {
            if instance.status == InstanceStatus::Running
                && instance.last_updated < cutoff
                && !exclude.contains(&instance.task_name)
            {
                instance.status = InstanceStatus::Pending;
                instance.last_updated = now;
                requeued.push(instance.task_name.clone());
            }
        }
        requeued.sort();
        Ok(requeued)
    }

    async fn get_instance(&self, name: &TaskName) -> Result<TaskInstance, StorageError> {
        let instances = self
            .instances
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        instances
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("instance: {}", name)))
    }

    async fn list_instances(&self) -> Result<Vec<TaskInstance>, StorageError> {
        let instances = self
            .instances
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(sorted_by_admission(instances.values().cloned().collect()))
    }
}
