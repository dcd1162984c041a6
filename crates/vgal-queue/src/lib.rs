//! Queues and notification delivery.
//!
//! This crate provides:
//! - Ingest of `AnalyzeVideoJob`s via Redis Streams (consumer groups,
//!   retry counting, dead letter stream)
//! - The delayed re-check queue with per-video single-flight leases,
//!   in memory or on Redis
//! - Client notifications via Redis Pub/Sub

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;
pub mod recheck;

pub use error::{QueueError, QueueResult};
pub use job::{AnalyzeVideoJob, RecheckJob};
pub use progress::{NotificationEnvelope, NotificationSink, ProgressChannel};
pub use queue::{JobQueue, QueueConfig};
pub use recheck::{
    InMemoryRecheckQueue, RecheckQueue, RecheckQueueConfig, RedisRecheckQueue,
    DEFAULT_LEASE_TTL,
};
