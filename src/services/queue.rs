use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "social_post:jobs";
const PROCESSING_KEY: &str = "social_post:processing";

/// Job payload serialized into Redis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }
}

/// Hands job ids to the worker pool.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Forget any in-flight marker for the job (before re-dispatching it).
    async fn release(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Whether a payload for the job is still waiting to be picked up.
    async fn is_pending(&self, job_id: Uuid) -> Result<bool, QueueError>;
}

/// Redis-backed durable job queue.
///
/// Items move atomically from the pending list to a processing list when
/// popped and are removed from it only once the run has finished, so a
/// crashed worker leaves evidence behind instead of losing the job.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Enqueue a generation job.
    pub async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Dequeue a job for processing (pop with move to processing list).
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let job: QueuedJob = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Payloads in `key` that belong to `job_id`.
    async fn payloads_for(&self, key: &str, job_id: Uuid) -> Result<Vec<String>, QueueError> {
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn.lrange(key, 0, -1).await.map_err(QueueError::Redis)?;

        Ok(payloads
            .into_iter()
            .filter(|payload| {
                serde_json::from_str::<QueuedJob>(payload)
                    .map(|queued| queued.job_id == job_id)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Mark a job as complete (remove from processing list).
    pub async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.enqueue(&QueuedJob::new(job_id)).await
    }

    async fn release(&self, job_id: Uuid) -> Result<(), QueueError> {
        let in_flight = self.payloads_for(PROCESSING_KEY, job_id).await?;
        if in_flight.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        for payload in in_flight {
            conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
                .await
                .map_err(QueueError::Redis)?;
        }
        Ok(())
    }

    async fn is_pending(&self, job_id: Uuid) -> Result<bool, QueueError> {
        Ok(!self.payloads_for(QUEUE_KEY, job_id).await?.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
