//! Delayed re-check queue.
//!
//! Holds at most one scheduled re-check per video. A claimed entry stays in
//! the queue with its due time pushed past the lease, so a worker that dies
//! mid re-check does not lose the video: once the lease expires the entry
//! becomes due again and another worker claims it.
//!
//! Lifecycle of an entry:
//! `schedule` -> `claim_due` (lease taken) -> `reschedule` (next attempt,
//! lease dropped) or `complete` (entry and lease removed).
//!
//! Every claim hands out a fresh lease token in `RecheckJob::lease`.
//! `reschedule` and `complete` only act while that token still holds the
//! lease, so a holder whose lease expired cannot release its successor's.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::Script;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use vgal_models::VideoId;

use crate::error::QueueResult;
use crate::job::RecheckJob;

/// Time a claimed re-check may run before another worker can take it over.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(600);

/// Store of delayed, single-flight re-checks.
#[async_trait]
pub trait RecheckQueue: Send + Sync {
    /// Schedule a re-check `delay` from now.
    ///
    /// Returns `false` (and changes nothing) if the video already has one.
    async fn schedule(&self, job: RecheckJob, delay: Duration) -> QueueResult<bool>;

    /// Lease up to `limit` due re-checks. A video is never handed out while
    /// another holder's lease is live.
    async fn claim_due(&self, limit: usize) -> QueueResult<Vec<RecheckJob>>;

    /// Replace a claimed entry with its follow-up and drop the lease.
    ///
    /// `job.lease` must still hold the lease; returns `false` (and changes
    /// nothing) otherwise.
    async fn reschedule(&self, job: RecheckJob, delay: Duration) -> QueueResult<bool>;

    /// Remove a claimed entry and its lease.
    ///
    /// Same lease rule as `reschedule`.
    async fn complete(&self, job: &RecheckJob) -> QueueResult<bool>;

    /// Number of scheduled (including leased) re-checks.
    async fn len(&self) -> QueueResult<usize>;
}

// ============================================================================
// In memory
// ============================================================================

#[derive(Debug)]
struct Lease {
    token: String,
    until: Instant,
}

#[derive(Debug)]
struct Entry {
    job: RecheckJob,
    due: Instant,
    lease: Option<Lease>,
}

impl Entry {
    fn leased(&self, now: Instant) -> bool {
        self.lease.as_ref().is_some_and(|l| l.until > now)
    }

    fn held_by(&self, token: Option<&str>, now: Instant) -> bool {
        match (&self.lease, token) {
            (Some(lease), Some(token)) => lease.token == token && lease.until > now,
            _ => false,
        }
    }
}

/// Process-local re-check queue.
pub struct InMemoryRecheckQueue {
    entries: Mutex<HashMap<VideoId, Entry>>,
    lease_ttl: Duration,
    next_lease: AtomicU64,
}

impl Default for InMemoryRecheckQueue {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TTL)
    }
}

impl InMemoryRecheckQueue {
    pub fn new(lease_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lease_ttl,
            next_lease: AtomicU64::new(1),
        }
    }

    /// Scheduled job for a video, if any.
    pub async fn scheduled(&self, video_id: &VideoId) -> Option<RecheckJob> {
        self.entries
            .lock()
            .await
            .get(video_id)
            .map(|e| e.job.clone())
    }

    fn lease_token(&self) -> String {
        format!("local:{}", self.next_lease.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl RecheckQueue for InMemoryRecheckQueue {
    async fn schedule(&self, job: RecheckJob, delay: Duration) -> QueueResult<bool> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&job.video_id) {
            return Ok(false);
        }

        entries.insert(
            job.video_id.clone(),
            Entry {
                job,
                due: Instant::now() + delay,
                lease: None,
            },
        );
        Ok(true)
    }

    async fn claim_due(&self, limit: usize) -> QueueResult<Vec<RecheckJob>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let mut due: Vec<(Instant, VideoId)> = entries
            .iter()
            .filter(|(_, e)| e.due <= now)
            .filter(|(_, e)| !e.leased(now))
            .map(|(id, e)| (e.due, id.clone()))
            .collect();
        due.sort();

        let mut claimed = Vec::new();
        for (_, video_id) in due.into_iter().take(limit) {
            if let Some(entry) = entries.get_mut(&video_id) {
                let token = self.lease_token();
                entry.lease = Some(Lease {
                    token: token.clone(),
                    until: now + self.lease_ttl,
                });
                entry.due = now + self.lease_ttl;

                let mut job = entry.job.clone();
                job.lease = Some(token);
                claimed.push(job);
            }
        }

        Ok(claimed)
    }

    async fn reschedule(&self, mut job: RecheckJob, delay: Duration) -> QueueResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&job.video_id) else {
            return Ok(false);
        };
        if !entry.held_by(job.lease.as_deref(), now) {
            warn!(video_id = %job.video_id, "Re-check lease lost, not rescheduling");
            return Ok(false);
        }

        job.lease = None;
        *entry = Entry {
            job,
            due: now + delay,
            lease: None,
        };
        Ok(true)
    }

    async fn complete(&self, job: &RecheckJob) -> QueueResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(&job.video_id) {
            Some(entry) if entry.held_by(job.lease.as_deref(), now) => {
                entries.remove(&job.video_id);
                Ok(true)
            }
            Some(_) => {
                warn!(video_id = %job.video_id, "Re-check lease lost, not completing");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.entries.lock().await.len())
    }
}

// ============================================================================
// Redis
// ============================================================================

// KEYS: due zset, job hash. ARGV: member, score, payload.
const SCHEDULE_SCRIPT: &str = r#"
if redis.call('ZADD', KEYS[1], 'NX', ARGV[2], ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
return 1
"#;

// KEYS: due zset, job hash. ARGV: now ms, limit, lease ms, lease key prefix, holder.
// Returns a flat list of (payload, lease token) pairs.
const CLAIM_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local lease_ms = tonumber(ARGV[3])
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'LIMIT', 0, tonumber(ARGV[2]))
local out = {}
for _, id in ipairs(ids) do
    local lease_key = ARGV[4] .. id
    local token = ARGV[5] .. ':' .. ARGV[1]
    if redis.call('SET', lease_key, token, 'NX', 'PX', lease_ms) then
        local job = redis.call('HGET', KEYS[2], id)
        if job then
            redis.call('ZADD', KEYS[1], now + lease_ms, id)
            table.insert(out, job)
            table.insert(out, token)
        else
            redis.call('ZREM', KEYS[1], id)
            redis.call('DEL', lease_key)
        end
    end
end
return out
"#;

// KEYS: due zset, job hash, lease key. ARGV: member, score, payload, lease token.
const RESCHEDULE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[3]) ~= ARGV[4] then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
redis.call('DEL', KEYS[3])
return 1
"#;

// KEYS: due zset, job hash, lease key. ARGV: member, lease token.
const COMPLETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[3]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('DEL', KEYS[3])
return 1
"#;

/// Redis re-check queue configuration.
#[derive(Debug, Clone)]
pub struct RecheckQueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for the queue's keys
    pub key_prefix: String,
    /// Lease duration of a claimed re-check
    pub lease_ttl: Duration,
}

impl Default for RecheckQueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vgal:recheck".to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }
}

impl RecheckQueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("RECHECK_KEY_PREFIX")
                .unwrap_or_else(|_| "vgal:recheck".to_string()),
            lease_ttl: Duration::from_secs(
                std::env::var("RECHECK_LEASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LEASE_TTL.as_secs()),
            ),
        }
    }
}

/// Re-check queue shared by every worker through Redis.
///
/// `{prefix}:due` is a sorted set of video ids scored by due time (unix ms),
/// `{prefix}:jobs` maps video id to the job payload and
/// `{prefix}:lease:{video_id}` is the single-flight lease.
pub struct RedisRecheckQueue {
    client: redis::Client,
    config: RecheckQueueConfig,
    holder: String,
    schedule_script: Script,
    claim_script: Script,
    reschedule_script: Script,
    complete_script: Script,
}

impl RedisRecheckQueue {
    /// `holder` prefixes this worker's lease tokens.
    pub fn new(config: RecheckQueueConfig, holder: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            holder: holder.into(),
            schedule_script: Script::new(SCHEDULE_SCRIPT),
            claim_script: Script::new(CLAIM_SCRIPT),
            reschedule_script: Script::new(RESCHEDULE_SCRIPT),
            complete_script: Script::new(COMPLETE_SCRIPT),
        })
    }

    fn due_key(&self) -> String {
        format!("{}:due", self.config.key_prefix)
    }

    fn jobs_key(&self) -> String {
        format!("{}:jobs", self.config.key_prefix)
    }

    fn lease_prefix(&self) -> String {
        format!("{}:lease:", self.config.key_prefix)
    }

    fn lease_key(&self, video_id: &VideoId) -> String {
        format!("{}{}", self.lease_prefix(), video_id)
    }
}

fn due_at_ms(delay: Duration) -> i64 {
    Utc::now().timestamp_millis() + delay.as_millis() as i64
}

#[async_trait]
impl RecheckQueue for RedisRecheckQueue {
    async fn schedule(&self, job: RecheckJob, delay: Duration) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&job)?;

        let added: i32 = self
            .schedule_script
            .key(self.due_key())
            .key(self.jobs_key())
            .arg(job.video_id.as_str())
            .arg(due_at_ms(delay))
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        debug!(video_id = %job.video_id, attempt = job.attempt, added = added == 1, "Scheduled re-check");
        Ok(added == 1)
    }

    async fn claim_due(&self, limit: usize) -> QueueResult<Vec<RecheckJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let claimed: Vec<String> = self
            .claim_script
            .key(self.due_key())
            .key(self.jobs_key())
            .arg(Utc::now().timestamp_millis())
            .arg(limit)
            .arg(self.config.lease_ttl.as_millis() as u64)
            .arg(self.lease_prefix())
            .arg(&self.holder)
            .invoke_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(claimed.len() / 2);
        for pair in claimed.chunks_exact(2) {
            let mut job: RecheckJob = serde_json::from_str(&pair[0])?;
            job.lease = Some(pair[1].clone());
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn reschedule(&self, job: RecheckJob, delay: Duration) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&job)?;

        let done: i32 = self
            .reschedule_script
            .key(self.due_key())
            .key(self.jobs_key())
            .key(self.lease_key(&job.video_id))
            .arg(job.video_id.as_str())
            .arg(due_at_ms(delay))
            .arg(payload)
            .arg(job.lease.as_deref().unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        if done == 1 {
            debug!(video_id = %job.video_id, attempt = job.attempt, "Rescheduled re-check");
        } else {
            warn!(video_id = %job.video_id, "Re-check lease lost, not rescheduling");
        }
        Ok(done == 1)
    }

    async fn complete(&self, job: &RecheckJob) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let done: i32 = self
            .complete_script
            .key(self.due_key())
            .key(self.jobs_key())
            .key(self.lease_key(&job.video_id))
            .arg(job.video_id.as_str())
            .arg(job.lease.as_deref().unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        if done == 0 {
            warn!(video_id = %job.video_id, "Re-check lease lost, not completing");
        }
        Ok(done == 1)
    }

    async fn len(&self) -> QueueResult<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: usize = redis::cmd("ZCARD")
            .arg(self.due_key())
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}
