//! Job types for the queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vgal_models::{JobId, VideoId};

/// Request to analyze an uploaded video, enqueued by the upload layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeVideoJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Owner of the video
    pub user_id: String,
    /// Video to analyze
    pub video_id: VideoId,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl AnalyzeVideoJob {
    pub fn new(user_id: impl Into<String>, video_id: VideoId) -> Self {
        Self {
            job_id: JobId::new(),
            user_id: user_id.into(),
            video_id,
            created_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    ///
    /// One analysis per video: re-uploads get a new video id.
    pub fn idempotency_key(&self) -> String {
        format!("analyze:{}", self.video_id)
    }
}

/// A scheduled re-check of one video's pending analysis jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecheckJob {
    pub video_id: VideoId,
    pub user_id: String,
    /// 1-based re-check number
    pub attempt: u32,
    /// Lease token of the claim this job came from. Set by `claim_due`,
    /// carried by `next`, never persisted.
    #[serde(skip)]
    pub lease: Option<String>,
}

impl RecheckJob {
    /// First re-check of a video.
    pub fn first(video_id: VideoId, user_id: impl Into<String>) -> Self {
        Self {
            video_id,
            user_id: user_id.into(),
            attempt: 1,
            lease: None,
        }
    }

    /// The re-check that follows this one.
    pub fn next(&self) -> Self {
        Self {
            video_id: self.video_id.clone(),
            user_id: self.user_id.clone(),
            attempt: self.attempt + 1,
            lease: self.lease.clone(),
        }
    }
}
