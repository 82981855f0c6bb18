//! Definition API: create, list and delete recurring task definitions.

use chrono::{DateTime, Utc};
use tracing::info;

pub use crate::core::definition::DefinitionError;
use crate::core::definition::{DefinitionSpec, TaskDefinition};
use crate::core::types::TaskName;
use crate::storage::{Storage, StorageError};

/// Validate and store a new definition. Returns the stored record, whose
/// `next_run` is the first occurrence strictly after `max(now, start_date)`.
pub async fn create(
    storage: &dyn Storage,
    spec: DefinitionSpec,
    now: DateTime<Utc>,
) -> Result<TaskDefinition, DefinitionError> {
    let definition = spec.into_definition(now)?;
    let name = definition.name.clone();

    match storage.insert_definition(definition.clone()).await {
        Ok(()) => {}
        Err(StorageError::DuplicateKey(_)) => {
            return Err(DefinitionError::DuplicateName(name.into_string()));
        }
        Err(e) => return Err(DefinitionError::Storage(e)),
    }

    info!(task = %name, next_run = %definition.next_run, priority = %definition.priority, "Task definition created");
    Ok(definition)
}

/// List all definitions ordered by name.
pub async fn list(storage: &dyn Storage) -> Result<Vec<TaskDefinition>, DefinitionError> {
    storage
        .list_definitions()
        .await
        .map_err(DefinitionError::Storage)
}

/// Delete a definition. Existing instances for the name are left alone.
pub async fn delete(storage: &dyn Storage, name: &TaskName) -> Result<(), DefinitionError> {
    match storage.delete_definition(name).await {
        Ok(()) => {
            info!(task = %name, "Task definition deleted");
            Ok(())
        }
        Err(StorageError::NotFound(_)) => Err(DefinitionError::NotFound(name.to_string())),
        Err(e) => Err(DefinitionError::Storage(e)),
    }
}
