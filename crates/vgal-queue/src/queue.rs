//! Ingest queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::AnalyzeVideoJob;

const DEDUP_TTL_SECS: u64 = 3600;
const RETRY_COUNT_TTL_SECS: i64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// Idle time after which a delivered message may be claimed by another consumer
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vgal:analyze".to_string(),
            consumer_group: "vgal:workers".to_string(),
            dlq_stream_name: "vgal:analyze:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "vgal:analyze".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vgal:workers".to_string()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| "vgal:analyze:dlq".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// Ingest queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.config.stream_name, idempotency_key)
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.config.stream_name, message_id)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue an analysis request.
    ///
    /// A second request for the same video within the dedup window is
    /// rejected with `QueueError::Duplicate`.
    pub async fn enqueue(&self, job: &AnalyzeVideoJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let idempotency_key = job.idempotency_key();

        // SET NX claims the key so concurrent duplicates cannot both pass
        let dedup_key = self.dedup_key(&idempotency_key);
        let claimed: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(job.job_id.as_str())
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !claimed {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await?;

        info!(
            video_id = %job.video_id,
            "Enqueued job {} with message ID {}",
            job.job_id,
            message_id
        );

        Ok(message_id)
    }

    /// Acknowledge a job and delete it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(self.retry_key(message_id)).await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &AnalyzeVideoJob, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(video_id = %job.video_id, "Moved job {} to DLQ: {}", job.job_id, error);
        Ok(())
    }

    /// Allow the video to be enqueued again.
    pub async fn clear_dedup(&self, job: &AnalyzeVideoJob) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.dedup_key(&job.idempotency_key()))
            .await?;
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read new jobs for this consumer, blocking up to `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, AnalyzeVideoJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();

        for stream_key in result.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                if let Some(job) = self.decode_entry(&entry.id, &entry.map).await {
                    debug!("Consumed job {} from stream", job.job_id);
                    jobs.push((entry.id, job));
                }
            }
        }

        Ok(jobs)
    }

    /// Claim jobs delivered to a consumer that went silent for longer than
    /// the visibility timeout.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, AnalyzeVideoJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let idle_ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| p.id)
            .collect();

        if idle_ids.is_empty() {
            return Ok(Vec::new());
        }

        let result: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&idle_ids)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();

        for entry in result.ids {
            if let Some(job) = self.decode_entry(&entry.id, &entry.map).await {
                info!("Claimed pending job {} from stream", job.job_id);
                jobs.push((entry.id, job));
            }
        }

        Ok(jobs)
    }

    async fn decode_entry(
        &self,
        message_id: &str,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<AnalyzeVideoJob> {
        let Some(redis::Value::BulkString(payload)) = map.get("job") else {
            warn!("Stream entry {} has no job payload", message_id);
            self.ack(message_id).await.ok();
            return None;
        };

        match serde_json::from_slice::<AnalyzeVideoJob>(payload) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("Failed to parse job payload: {}", e);
                // Ack the malformed message to prevent reprocessing
                self.ack(message_id).await.ok();
                None
            }
        }
    }

    /// Get retry count for a job.
    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: Option<u32> = conn.get(self.retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment retry count for a job.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = self.retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_COUNT_TTL_SECS).await?;
        Ok(count)
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "vgal:analyze");
        assert_eq!(config.consumer_group, "vgal:workers");
        assert_eq!(config.dlq_stream_name, "vgal:analyze:dlq");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_key_layout() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        assert_eq!(queue.dedup_key("analyze:v1"), "vgal:analyze:dedup:analyze:v1");
        assert_eq!(queue.retry_key("1-0"), "vgal:analyze:retry:1-0");
    }
}
