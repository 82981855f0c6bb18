//! Redis-backed in-flight queue.
//!
//! The list lives under a single key (default `batch_run`). Pushes go to the
//! tail and pops come from the head. The bounded push runs as a Lua script
//! so the length check and `RPUSH` cannot interleave with another admitter.

use async_trait::async_trait;
use tracing::debug;

use super::{DEFAULT_QUEUE_KEY, InFlightQueue, QueueError};
use crate::core::types::TaskName;

const BOUNDED_PUSH: &str = r#"
if redis.call('LLEN', KEYS[1]) >= tonumber(ARGV[2]) then
  return 0
end
redis.call('RPUSH', KEYS[1], ARGV[1])
return 1
"#;

/// In-flight queue stored as a Redis list.
pub struct RedisQueue {
    client: redis::Client,
    key: String,
}

impl RedisQueue {
    /// Connect to `redis_url` using the default list key.
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        Self::with_key(redis_url, DEFAULT_QUEUE_KEY)
    }

    /// Connect to `redis_url` using a custom list key.
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn with_key(redis_url: &str, key: &str) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Other(e.to_string()))?;
        Ok(Self {
            client,
            key: key.to_string(),
        })
    }

    /// The list key.
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Unavailable(format!("Redis connection failed: {}", e)))
    }
}

fn command_error(command: &str, e: redis::RedisError) -> QueueError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
        QueueError::Unavailable(format!("Redis {} failed: {}", command, e))
    } else {
        QueueError::Other(format!("Redis {} failed: {}", command, e))
    }
}

#[async_trait]
impl InFlightQueue for RedisQueue {
    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.get_connection().await?;
        let len: usize = redis::cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("LLEN", e))?;
        Ok(len)
    }

    async fn try_push(&self, name: &TaskName, capacity: usize) -> Result<bool, QueueError> {
        let mut conn = self.get_connection().await?;
        let pushed: i64 = redis::cmd("EVAL")
            .arg(BOUNDED_PUSH)
            .arg(1)
            .arg(&self.key)
            .arg(name.as_str())
            .arg(capacity)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("EVAL", e))?;

        debug!(task = %name, key = %self.key, pushed = pushed == 1, "Bounded push");
        Ok(pushed == 1)
    }

    async fn pop(&self) -> Result<Option<TaskName>, QueueError> {
        let mut conn = self.get_connection().await?;
        let name: Option<String> = redis::cmd("LPOP")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("LPOP", e))?;
        Ok(name.map(TaskName::new))
    }

    async fn snapshot(&self) -> Result<Vec<TaskName>, QueueError> {
        let mut conn = self.get_connection().await?;
        let names: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("LRANGE", e))?;
        Ok(names.into_iter().map(TaskName::new).collect())
    }
}
