//! Video record models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::analysis::{
    Entity, FaceDetection, LabelResults, MediaRef, ModerationLabel, PendingJobs,
    SentimentAnalysis, StagedResults,
};

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Record created, upload not yet confirmed
    #[default]
    Pending,
    /// File stored, waiting for analysis
    Uploaded,
    /// Analysis jobs in flight
    Processing,
    /// Analysis merged into the record
    Completed,
    /// Processing failed
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more automated updates).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Video record persisted in the record store.
///
/// `pending_jobs`, `staged` and `progress` are the orchestrator's working
/// memory. They are persisted so a re-check picked up by another worker (or
/// after a restart) continues where the previous one stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID
    pub video_id: VideoId,

    /// Owner; also the notification address
    pub user_id: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Storage reference of the uploaded file
    pub media_ref: MediaRef,

    /// Processing status
    #[serde(default)]
    pub status: VideoStatus,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,

    /// Submitted jobs that have not been staged yet
    #[serde(default)]
    pub pending_jobs: PendingJobs,

    /// Results retrieved so far, waiting for the merge
    #[serde(default)]
    pub staged: StagedResults,

    /// Last progress percent sent to the client
    #[serde(default)]
    pub progress: u8,

    /// Search tags (user supplied, then merged with detected labels)
    #[serde(default)]
    pub tags: Vec<String>,

    /// Search categories
    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_objects: Option<LabelResults>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_faces: Option<Vec<FaceDetection>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderation_labels: Option<Vec<ModerationLabel>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_analysis: Option<SentimentAnalysis>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_phrases: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Store-managed revision used for compare-and-set updates
    #[serde(default)]
    pub revision: u64,
}

impl VideoRecord {
    /// Create a new record in the `pending` state.
    pub fn new(
        video_id: VideoId,
        user_id: impl Into<String>,
        title: impl Into<String>,
        media_ref: MediaRef,
    ) -> Self {
        let now = Utc::now();

        Self {
            video_id,
            user_id: user_id.into(),
            title: title.into(),
            media_ref,
            status: VideoStatus::Pending,
            error_message: None,
            processing_started_at: None,
            processing_completed_at: None,
            pending_jobs: PendingJobs::default(),
            staged: StagedResults::default(),
            progress: 0,
            tags: Vec::new(),
            categories: Vec::new(),
            transcript: None,
            detected_objects: None,
            detected_faces: None,
            moderation_labels: None,
            sentiment_analysis: None,
            key_phrases: None,
            entities: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Attach user supplied tags.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise the stored progress, returning the new value if it increased.
    pub fn advance_progress(&mut self, value: u8) -> Option<u8> {
        let value = value.min(100);
        if value > self.progress {
            self.progress = value;
            Some(value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VideoRecord {
        VideoRecord::new(
            VideoId::from("v1"),
            "user-1",
            "Holiday",
            MediaRef::from("s3://videos/user-1/v1.mp4"),
        )
    }

    #[test]
    fn test_video_id_generation() {
        let id1 = VideoId::new();
        let id2 = VideoId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_record_is_pending() {
        let rec = record();
        assert_eq!(rec.status, VideoStatus::Pending);
        assert!(rec.pending_jobs.is_empty());
        assert_eq!(rec.progress, 0);
        assert!(!rec.is_terminal());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut rec = record();
        assert_eq!(rec.advance_progress(25), Some(25));
        assert_eq!(rec.advance_progress(10), None);
        assert_eq!(rec.advance_progress(25), None);
        assert_eq!(rec.advance_progress(150), Some(100));
        assert_eq!(rec.progress, 100);
    }

    #[test]
    fn test_record_serialization_skips_empty_results() {
        let json = serde_json::to_string(&record()).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("transcript"));
        assert!(!json.contains("error_message"));

        let back: VideoRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.video_id, VideoId::from("v1"));
    }

    #[test]
    fn test_record_fields_are_snake_case() {
        let mut rec = record();
        rec.processing_started_at = Some(Utc::now());
        let value = serde_json::to_value(&rec).unwrap();

        assert_eq!(value["video_id"], "v1");
        assert_eq!(value["user_id"], "user-1");
        assert!(value.get("processing_started_at").is_some());
        assert!(value.get("pending_jobs").is_some());
        assert!(value.get("videoId").is_none());
    }
}
