//! Redis-backed video store.
//!
//! Each record is a hash `{prefix}:video:{id}` with two fields: `rev` (the
//! revision) and `doc` (the JSON record). Records in `processing` are also
//! indexed in the sorted set `{prefix}:processing`, scored by the unix time
//! processing started, so the watchdog can find stuck videos without a scan.
//!
//! Writes go through Lua scripts so the revision check, the document write
//! and the index maintenance happen atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use tracing::debug;

use vgal_models::{VideoId, VideoRecord};

use crate::error::{StoreError, StoreResult};
use crate::store::VideoStore;

const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'rev', ARGV[1], 'doc', ARGV[2])
if ARGV[3] == 'processing' then
    redis.call('ZADD', KEYS[2], ARGV[4], ARGV[5])
end
return 1
"#;

const CAS_SCRIPT: &str = r#"
local rev = redis.call('HGET', KEYS[1], 'rev')
if not rev then
    return -1
end
if rev ~= ARGV[1] then
    return 0
end
redis.call('HSET', KEYS[1], 'rev', ARGV[2], 'doc', ARGV[3])
if ARGV[4] == 'processing' then
    redis.call('ZADD', KEYS[2], ARGV[5], ARGV[6])
else
    redis.call('ZREM', KEYS[2], ARGV[6])
end
return 1
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key written by the store
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vgal".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "vgal".to_string()),
        }
    }
}

/// Video store shared by every worker through Redis.
pub struct RedisVideoStore {
    client: redis::Client,
    config: RedisStoreConfig,
    create_script: Script,
    cas_script: Script,
}

impl RedisVideoStore {
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            create_script: Script::new(CREATE_SCRIPT),
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(RedisStoreConfig::from_env())
    }

    fn record_key(&self, video_id: &VideoId) -> String {
        format!("{}:video:{}", self.config.key_prefix, video_id)
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.config.key_prefix)
    }

    /// Delete a record and its index entry.
    pub async fn delete(&self, video_id: &VideoId) -> StoreResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (removed, _): (u32, u32) = redis::pipe()
            .atomic()
            .del(self.record_key(video_id))
            .zrem(self.processing_key(), video_id.as_str())
            .query_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }
}

fn processing_score(record: &VideoRecord) -> i64 {
    record
        .processing_started_at
        .unwrap_or(record.updated_at)
        .timestamp()
}

#[async_trait]
impl VideoStore for RedisVideoStore {
    async fn create(&self, record: &VideoRecord) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let doc = serde_json::to_string(record)?;

        let created: i32 = self
            .create_script
            .key(self.record_key(&record.video_id))
            .key(self.processing_key())
            .arg(record.revision)
            .arg(doc)
            .arg(record.status.as_str())
            .arg(processing_score(record))
            .arg(record.video_id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(StoreError::AlreadyExists(record.video_id.to_string()));
        }

        debug!(video_id = %record.video_id, "Created video record");
        Ok(())
    }

    async fn get(&self, video_id: &VideoId) -> StoreResult<Option<VideoRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let doc: Option<String> = redis::cmd("HGET")
            .arg(self.record_key(video_id))
            .arg("doc")
            .query_async(&mut conn)
            .await?;

        doc.map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn compare_and_swap(
        &self,
        record: &VideoRecord,
        expected_revision: u64,
    ) -> StoreResult<VideoRecord> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut stored = record.clone();
        stored.revision = expected_revision + 1;
        let doc = serde_json::to_string(&stored)?;

        let outcome: i32 = self
            .cas_script
            .key(self.record_key(&record.video_id))
            .key(self.processing_key())
            .arg(expected_revision)
            .arg(stored.revision)
            .arg(doc)
            .arg(stored.status.as_str())
            .arg(processing_score(&stored))
            .arg(stored.video_id.as_str())
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(stored),
            0 => Err(StoreError::Conflict(format!(
                "{} changed since revision {}",
                record.video_id, expected_revision
            ))),
            _ => Err(StoreError::not_found(record.video_id.as_str())),
        }
    }

    async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<VideoId>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // exclusive upper bound
        let max = format!("({}", started_before.timestamp());
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.processing_key())
            .arg("-inf")
            .arg(max)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        Ok(ids.into_iter().map(VideoId::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgal_models::{MediaRef, VideoEvent, VideoStatus};

    #[test]
    fn test_config_defaults() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.key_prefix, "vgal");
    }

    #[test]
    fn test_key_layout() {
        let store = RedisVideoStore::new(RedisStoreConfig {
            redis_url: "redis://localhost:6379".into(),
            key_prefix: "test".into(),
        })
        .unwrap();

        assert_eq!(store.record_key(&VideoId::from("v1")), "test:video:v1");
        assert_eq!(store.processing_key(), "test:processing");
    }

    #[test]
    fn test_processing_score_uses_start_time() {
        let mut rec = VideoRecord::new(
            VideoId::from("v1"),
            "u1",
            "t",
            MediaRef::from("s3://b/v1.mp4"),
        );
        rec.status = VideoStatus::Uploaded;
        rec.apply(VideoEvent::ProcessingStarted).unwrap();

        let started = rec.processing_started_at.unwrap();
        assert_eq!(processing_score(&rec), started.timestamp());
    }
}
