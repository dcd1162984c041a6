//! Client notification types.
//!
//! Events are pushed to the notification sink keyed by the owning user and
//! forwarded to connected clients as-is.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::analysis::{Entity, SentimentAnalysis};
use crate::video::{VideoId, VideoRecord, VideoStatus};

/// Final analysis attached to a `completed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisSummary {
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentAnalysis>,
    #[serde(default)]
    pub key_phrases: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(rename = "objectCount")]
    pub object_count: usize,
    #[serde(rename = "faceCount")]
    pub face_count: usize,
    #[serde(rename = "moderationLabelCount")]
    pub moderation_label_count: usize,
}

impl AnalysisSummary {
    /// Summarize the merged fields of a record.
    pub fn from_record(record: &VideoRecord) -> Self {
        Self {
            tags: record.tags.clone(),
            categories: record.categories.clone(),
            transcript: record.transcript.clone(),
            sentiment: record.sentiment_analysis.clone(),
            key_phrases: record.key_phrases.clone().unwrap_or_default(),
            entities: record.entities.clone().unwrap_or_default(),
            object_count: record.detected_objects.as_ref().map_or(0, |o| o.len()),
            face_count: record.detected_faces.as_ref().map_or(0, |f| f.len()),
            moderation_label_count: record.moderation_labels.as_ref().map_or(0, |m| m.len()),
        }
    }
}

/// Notification envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Progress update (0-100)
    Progress {
        video_id: VideoId,
        status: VideoStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },

    /// Analysis merged, video completed
    Completed {
        video_id: VideoId,
        status: VideoStatus,
        summary: AnalysisSummary,
    },

    /// Processing failed
    Failed {
        video_id: VideoId,
        status: VideoStatus,
        error_message: String,
    },
}

impl Notification {
    /// Event name for progress updates.
    pub const PROGRESS: &'static str = "video_progress";
    /// Event name for completion.
    pub const COMPLETED: &'static str = "video_completed";
    /// Event name for failures.
    pub const FAILED: &'static str = "video_failed";

    /// Create a progress notification.
    pub fn progress(video_id: VideoId, message: impl Into<String>, value: u8) -> Self {
        Notification::Progress {
            video_id,
            status: VideoStatus::Processing,
            message: Some(message.into()),
            progress: Some(value.min(100)),
        }
    }

    /// Create a completion notification from the final record.
    pub fn completed(record: &VideoRecord) -> Self {
        Notification::Completed {
            video_id: record.video_id.clone(),
            status: VideoStatus::Completed,
            summary: AnalysisSummary::from_record(record),
        }
    }

    /// Create a failure notification.
    pub fn failed(video_id: VideoId, error_message: impl Into<String>) -> Self {
        Notification::Failed {
            video_id,
            status: VideoStatus::Failed,
            error_message: error_message.into(),
        }
    }

    /// Event name used when publishing.
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::Progress { .. } => Self::PROGRESS,
            Notification::Completed { .. } => Self::COMPLETED,
            Notification::Failed { .. } => Self::FAILED,
        }
    }

    pub fn video_id(&self) -> &VideoId {
        match self {
            Notification::Progress { video_id, .. }
            | Notification::Completed { video_id, .. }
            | Notification::Failed { video_id, .. } => video_id,
        }
    }

    /// Progress percent carried by the event, if any.
    pub fn progress_value(&self) -> Option<u8> {
        match self {
            Notification::Progress { progress, .. } => *progress,
            Notification::Completed { .. } => Some(100),
            Notification::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_serialization() {
        let msg = Notification::progress(VideoId::from("v1"), "Analysis jobs submitted", 25);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"video_id\":\"v1\""));
        assert!(json.contains("\"status\":\"processing\""));
        assert!(json.contains("\"progress\":25"));
        assert_eq!(msg.event_name(), "video_progress");
    }

    #[test]
    fn test_progress_clamps_to_100() {
        let msg = Notification::progress(VideoId::from("v1"), "done", 150);
        assert_eq!(msg.progress_value(), Some(100));
    }

    #[test]
    fn test_failed_event() {
        let msg = Notification::failed(VideoId::from("v1"), "Processing timeout");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"failed\""));
        assert!(json.contains("\"error_message\":\"Processing timeout\""));
        assert_eq!(msg.event_name(), Notification::FAILED);
        assert_eq!(msg.video_id().as_str(), "v1");
    }
}
