//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Conditional status
//! transitions are expressed as `UPDATE ... WHERE status = <expected>` so
//! the database decides which caller wins. Transactions that read before
//! writing take the write lock up front, so concurrent claimers queue on the
//! busy timeout instead of failing on a lock upgrade.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use super::{Storage, StorageError};
use crate::core::definition::TaskDefinition;
use crate::core::instance::{EnqueueOutcome, InstanceStatus, TaskInstance};
use crate::core::types::{InstanceId, Priority, TaskName};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

type DefinitionRow = (String, String, String, i64, i64, i64, i64, i64);
type InstanceRow = (String, String, i64, String, i64);

const DEFINITION_COLUMNS: &str =
    "name, cron, timezone, start_date, end_date, priority, next_run, created_at";
const INSTANCE_COLUMNS: &str = "task_name, id, priority, status, last_updated";
const ADMISSION_ORDER: &str = "ORDER BY priority, last_updated, task_name";

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin_write(
        &self,
    ) -> Result<sqlx::Transaction<'static, sqlx::Sqlite>, StorageError> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(map_sqlx_error)
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_lock_contention(e: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    // Extended result codes carry the primary code in the low byte.
    e.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

/// Connection-level failures and lock contention are transient; everything
/// else is not.
fn map_sqlx_error(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Database(ref db) if is_lock_contention(&**db) => {
            StorageError::Unavailable(e.to_string())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::Unavailable(e.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StorageError::SerializationError(e.to_string())
        }
        other => StorageError::Other(other.to_string()),
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::SerializationError(format!("invalid timestamp: {}", millis)))
}

fn decode_priority(value: i64) -> Result<Priority, StorageError> {
    Priority::try_from(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn definition_from_row(row: DefinitionRow) -> Result<TaskDefinition, StorageError> {
    Ok(TaskDefinition {
        name: TaskName::new(row.0),
        cron: row.1,
        timezone: row.2,
        start_date: from_millis(row.3)?,
        end_date: from_millis(row.4)?,
        priority: decode_priority(row.5)?,
        next_run: from_millis(row.6)?,
        created_at: from_millis(row.7)?,
    })
}

fn instance_from_row(row: InstanceRow) -> Result<TaskInstance, StorageError> {
    Ok(TaskInstance {
        task_name: TaskName::new(row.0),
        id: InstanceId::from_uuid(
            row.1
                .parse()
                .map_err(|e| StorageError::SerializationError(format!("invalid uuid: {}", e)))?,
        ),
        priority: decode_priority(row.2)?,
        status: row
            .3
            .parse::<InstanceStatus>()
            .map_err(StorageError::SerializationError)?,
        last_updated: from_millis(row.4)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_definition(&self, definition: TaskDefinition) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO task_definitions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            DEFINITION_COLUMNS
        ))
        .bind(definition.name.as_str())
        .bind(&definition.cron)
        .bind(&definition.timezone)
        .bind(to_millis(definition.start_date))
        .bind(to_millis(definition.end_date))
        .bind(i64::from(definition.priority.value()))
        .bind(to_millis(definition.next_run))
        .bind(to_millis(definition.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("definition: {}", definition.name)),
            ),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn get_definition(&self, name: &TaskName) -> Result<TaskDefinition, StorageError> {
        let row: DefinitionRow = sqlx::query_as(&format!(
            "SELECT {} FROM task_definitions WHERE name = ?",
            DEFINITION_COLUMNS
        ))
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StorageError::NotFound(format!("definition: {}", name)))?;

        definition_from_row(row)
    }

    async fn list_definitions(&self) -> Result<Vec<TaskDefinition>, StorageError> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM task_definitions ORDER BY name",
            DEFINITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(definition_from_row).collect()
    }

    async fn delete_definition(&self, name: &TaskName) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM task_definitions WHERE name = ?")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("definition: {}", name)));
        }
        Ok(())
    }

    async fn due_definitions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, StorageError> {
        let now = to_millis(now);
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM task_definitions WHERE next_run <= ? AND end_date >= ? ORDER BY name",
            DEFINITION_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(definition_from_row).collect()
    }

    async fn set_next_run(
        &self,
        name: &TaskName,
        next_run: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE task_definitions SET next_run = ? WHERE name = ?")
            .bind(to_millis(next_run))
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("definition: {}", name)));
        }
        Ok(())
    }

    async fn enqueue_instance(
        &self,
        name: &TaskName,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StorageError> {
        // Revive only completed rows; pending or running rows make this a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO task_instances (task_name, id, priority, status, last_updated)
            VALUES (?, ?, ?, 'pending', ?)
            ON CONFLICT (task_name) DO UPDATE SET
                id = excluded.id,
                priority = excluded.priority,
                status = 'pending',
                last_updated = excluded.last_updated
            WHERE task_instances.status = 'completed'
            "#,
        )
        .bind(name.as_str())
        .bind(InstanceId::new().to_string())
        .bind(i64::from(priority.value()))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(if result.rows_affected() == 0 {
            EnqueueOutcome::Duplicate
        } else {
            EnqueueOutcome::Inserted
        })
    }

    async fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut tx = self.begin_write().await?;

        let ordered: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT task_name FROM task_instances WHERE status = 'pending' {} LIMIT ?",
            ADMISSION_ORDER
        ))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let updated: Vec<(String,)> = sqlx::query_as(&format!(
            r#"
            UPDATE task_instances SET status = 'running', last_updated = ?
            WHERE status = 'pending' AND task_name IN (
                SELECT task_name FROM task_instances WHERE status = 'pending' {} LIMIT ?
            )
            RETURNING task_name
            "#,
            ADMISSION_ORDER
        ))
        .bind(to_millis(now))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let updated: HashSet<String> = updated.into_iter().map(|(name,)| name).collect();
        Ok(ordered
            .into_iter()
            .filter(|(name,)| updated.contains(name))
            .map(|(name,)| TaskName::new(name))
            .collect())
    }

    async fn release_running(
        &self,
        names: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut tx = self.begin_write().await?;
        let mut released = 0;

        for name in names {
            let result = sqlx::query(
                "UPDATE task_instances SET status = 'pending', last_updated = ? \
                 WHERE task_name = ? AND status = 'running'",
            )
            .bind(to_millis(now))
            .bind(name.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            released += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(released)
    }

    async fn complete_instance(
        &self,
        name: &TaskName,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE task_instances SET status = 'completed', last_updated = ? \
             WHERE task_name = ? AND status = 'running'",
        )
        .bind(to_millis(now))
        .bind(name.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_completed(&self) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM task_instances WHERE status = 'completed'")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() as usize)
    }

    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        exclude: &[TaskName],
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskName>, StorageError> {
        let cutoff = to_millis(cutoff);
        let mut tx = self.begin_write().await?;

        let stale: Vec<(String,)> = sqlx::query_as(
            "SELECT task_name FROM task_instances \
             WHERE status = 'running' AND last_updated < ? ORDER BY task_name",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut requeued = Vec::new();
        for (name,) in stale {
            if exclude.iter().any(|n| n.as_str() == name) {
                continue;
            }
            let result = sqlx::query(
                "UPDATE task_instances SET status = 'pending', last_updated = ? \
                 WHERE task_name = ? AND status = 'running' AND last_updated < ?",
            )
            .bind(to_millis(now))
            .bind(&name)
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            if result.rows_affected() == 1 {
                requeued.push(TaskName::new(name));
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(requeued)
    }

    async fn get_instance(&self, name: &TaskName) -> Result<TaskInstance, StorageError> {
        let row: InstanceRow = sqlx::query_as(&format!(
            "SELECT {} FROM task_instances WHERE task_name = ?",
            INSTANCE_COLUMNS
        ))
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StorageError::NotFound(format!("instance: {}", name)))?;

        instance_from_row(row)
    }

    async fn list_instances(&self) -> Result<Vec<TaskInstance>, StorageError> {
        let rows: Vec<InstanceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM task_instances {}",
            INSTANCE_COLUMNS, ADMISSION_ORDER
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(instance_from_row).collect()
    }
}
