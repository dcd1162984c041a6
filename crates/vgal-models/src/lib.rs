//! Shared data models for the video analysis backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and the processing state machine
//! - Analysis job kinds, handles and per-kind payloads
//! - Staged results held between re-checks
//! - Notification schemas pushed to clients

pub mod analysis;
pub mod job;
pub mod notification;
pub mod state;
pub mod video;

// Re-export common types
pub use analysis::{
    AnalysisJob, BoundingBox, Entity, FaceDetection, JobHandle, JobKind, JobPayload, JobPoll,
    LabelDetection, LabelInstance, LabelResults, MediaRef, ModerationLabel, PendingJobs,
    SentimentAnalysis, SentimentScores, StagedPayload, StagedResults, StagedTranscript,
    TextInsights, Transcript, TranscriptItem,
};
pub use job::JobId;
pub use notification::{AnalysisSummary, Notification};
pub use state::{TransitionError, VideoEvent, WATCHDOG_TIMEOUT_MESSAGE};
pub use video::{VideoId, VideoRecord, VideoStatus};
