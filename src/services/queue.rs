use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::submission::YieldInputs;

const QUEUE_KEY: &str = "agrisense:inference:jobs";
const PROCESSING_KEY: &str = "agrisense:inference:processing";
const DEAD_LETTER_KEY: &str = "agrisense:inference:dead";

/// Deliveries beyond this count are diverted to the dead-letter list
/// instead of being redelivered.
const MAX_DELIVERIES: u32 = 3;

/// Job message serialized into Redis. One message per job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub message_id: Uuid,
    pub job_id: Uuid,
    pub primary_image_key: String,
    pub mask_image_key: Option<String>,
    pub yield_inputs: YieldInputs,
    /// Delivery attempts so far; incremented on nack.
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedJob {
    pub fn new(
        job_id: Uuid,
        primary_image_key: String,
        mask_image_key: Option<String>,
        yield_inputs: YieldInputs,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            job_id,
            primary_image_key,
            mask_image_key,
            yield_inputs,
            attempts: 0,
        }
    }
}

/// Redis-backed job queue with at-least-once delivery.
///
/// A dequeue moves the message onto a processing list; a consumer
/// crash leaves it there for redelivery, so consumers must be
/// idempotent under repeated delivery of the same message.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue an inference job message.
    pub async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Dequeue the next message, atomically moving it to the processing
    /// list. Returns `None` when the queue is empty.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let job: QueuedJob =
                    serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Acknowledge a delivery: the message is removed from the
    /// processing list and will not be seen again.
    pub async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Negative acknowledgement: request redelivery of the message.
    ///
    /// The attempt counter is incremented; once `MAX_DELIVERIES` is
    /// reached the message lands on the dead-letter list instead.
    pub async fn nack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        let delivered = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivered)
            .await
            .map_err(QueueError::Redis)?;

        let mut redelivery = job.clone();
        redelivery.attempts += 1;
        let payload = serde_json::to_string(&redelivery).map_err(QueueError::Serialize)?;

        let target = if redelivery.attempts >= MAX_DELIVERIES {
            tracing::warn!(
                job_id = %job.job_id,
                message_id = %job.message_id,
                attempts = redelivery.attempts,
                "Delivery attempts exhausted, moving message to dead-letter list"
            );
            DEAD_LETTER_KEY
        } else {
            QUEUE_KEY
        };

        conn.lpush::<_, _, ()>(target, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending messages).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
