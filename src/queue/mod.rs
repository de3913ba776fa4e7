// src/queue/mod.rs

use async_trait::async_trait;
use deadpool_redis::redis::{AsyncCommands, Direction};
use deadpool_redis::{Config, Pool, Runtime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::QueueError;
use crate::models::JobDescriptor;

// --- Queue names ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Requested,
    Ready,
    Failure,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Requested, QueueName::Ready, QueueName::Failure];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Requested => "requested",
            QueueName::Ready => "ready",
            QueueName::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.as_str() == value)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Raw list primitives ---

/// Ordered lists shared by every process of the pipeline.
///
/// Pops must be a single atomic command so that concurrent workers never
/// receive the same element.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn pop_left(&self, key: &str) -> Result<Option<String>, QueueError>;
    async fn blocking_pop_left(&self, key: &str, timeout: Duration) -> Result<Option<String>, QueueError>;
    /// Atomically moves the head of `from` to the tail of `to` (LMOVE).
    async fn move_head(&self, from: &str, to: &str) -> Result<Option<String>, QueueError>;
    async fn push_right(&self, key: &str, value: &str) -> Result<(), QueueError>;
    async fn len(&self, key: &str) -> Result<usize, QueueError>;
    async fn range(&self, key: &str) -> Result<Vec<String>, QueueError>;
}

pub fn init_redis_pool(redis_url: &str) -> Result<Pool, QueueError> {
    info!("Attempting to connect to Redis...");
    let cfg = Config::from_url(redis_url);
    let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
    info!("Successfully created Redis connection pool!");
    // Note: Connection check happens on first use
    Ok(pool)
}

#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
}

impl RedisQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for RedisQueue {
    async fn pop_left(&self, key: &str) -> Result<Option<String>, QueueError> {
        let mut con = self.pool.get().await?;
        Ok(con.lpop(key, None).await?)
    }

    async fn blocking_pop_left(&self, key: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut con = self.pool.get().await?;
        let popped: Option<(String, String)> = con.blpop(key, timeout.as_secs_f64()).await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn move_head(&self, from: &str, to: &str) -> Result<Option<String>, QueueError> {
        let mut con = self.pool.get().await?;
        Ok(con.lmove(from, to, Direction::Left, Direction::Right).await?)
    }

    async fn push_right(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let mut con = self.pool.get().await?;
        let _: () = con.rpush(key, value).await?;
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        let mut con = self.pool.get().await?;
        Ok(con.llen(key).await?)
    }

    async fn range(&self, key: &str) -> Result<Vec<String>, QueueError> {
        let mut con = self.pool.get().await?;
        Ok(con.lrange(key, 0, -1).await?)
    }
}

// --- Typed view over the three job queues ---

#[derive(Clone)]
pub struct JobQueues {
    store: Arc<dyn QueueStore>,
    prefix: String,
}

impl JobQueues {
    pub fn new(store: Arc<dyn QueueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, queue: QueueName) -> String {
        format!("{}:{}", self.prefix, queue.as_str())
    }

    /// Pops the head of `queue`. `Ok(None)` means the list is empty.
    ///
    /// An element that does not decode as a descriptor is moved verbatim to
    /// the failure list before the error is returned, so it is never lost.
    pub async fn pop(&self, queue: QueueName) -> Result<Option<JobDescriptor>, QueueError> {
        let raw = self.store.pop_left(&self.key(queue)).await?;
        self.decode(queue, raw).await
    }

    /// Like [`pop`](Self::pop), but waits up to `timeout` for an element.
    ///
    /// A zero timeout never reaches BLPOP, where it would mean "block forever".
    pub async fn pop_wait(
        &self,
        queue: QueueName,
        timeout: Duration,
    ) -> Result<Option<JobDescriptor>, QueueError> {
        if timeout.is_zero() {
            return self.pop(queue).await;
        }
        let raw = self.store.blocking_pop_left(&self.key(queue), timeout).await?;
        self.decode(queue, raw).await
    }

    async fn decode(
        &self,
        queue: QueueName,
        raw: Option<String>,
    ) -> Result<Option<JobDescriptor>, QueueError> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match JobDescriptor::from_json(&raw) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                warn!("Malformed entry in {}: {}. Moving it to failure.", queue, e);
                self.store
                    .push_right(&self.key(QueueName::Failure), &raw)
                    .await?;
                Err(QueueError::Descriptor(e))
            }
        }
    }

    /// Appends `job` to the tail of `queue`.
    pub async fn push(&self, queue: QueueName, job: &JobDescriptor) -> Result<(), QueueError> {
        self.store
            .push_right(&self.key(queue), &job.to_json()?)
            .await
    }

    pub async fn len(&self, queue: QueueName) -> Result<usize, QueueError> {
        self.store.len(&self.key(queue)).await
    }

    /// Raw contents of `queue`, head first, without removing anything.
    pub async fn peek_all(&self, queue: QueueName) -> Result<Vec<String>, QueueError> {
        self.store.range(&self.key(queue)).await
    }

    /// Moves one element from the head of `from` to the tail of `to` in a
    /// single command.
    pub async fn move_one(&self, from: QueueName, to: QueueName) -> Result<bool, QueueError> {
        let moved = self
            .store
            .move_head(&self.key(from), &self.key(to))
            .await?;
        Ok(moved.is_some())
    }
}
