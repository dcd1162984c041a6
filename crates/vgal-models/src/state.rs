//! Video processing state machine.
//!
//! ```text
//! pending --upload confirmed--> uploaded --started--> processing --merged--> completed
//!                                                        |   ^
//!                                                        |   +-- progress (self transition)
//!                                                        +--error / timeout / watchdog--> failed
//! ```
//!
//! `completed` and `failed` are terminal. A new upload gets a new record.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::video::{VideoRecord, VideoStatus};

/// Error message set when the watchdog force-fails a stuck video.
pub const WATCHDOG_TIMEOUT_MESSAGE: &str = "Processing timeout";

/// Event driving a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoEvent {
    /// The upload layer stored the file
    UploadConfirmed,
    /// The orchestrator submitted the analysis jobs
    ProcessingStarted,
    /// Intermediate progress, no status change
    ProgressUpdated,
    /// Every job settled and the merge was written
    AnalysisCompleted,
    /// Unrecoverable error or re-check budget exhausted
    ProcessingFailed(String),
    /// Stuck in processing for too long
    WatchdogTimeout,
}

impl VideoEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VideoEvent::UploadConfirmed => "upload_confirmed",
            VideoEvent::ProcessingStarted => "processing_started",
            VideoEvent::ProgressUpdated => "progress_updated",
            VideoEvent::AnalysisCompleted => "analysis_completed",
            VideoEvent::ProcessingFailed(_) => "processing_failed",
            VideoEvent::WatchdogTimeout => "watchdog_timeout",
        }
    }
}

/// Rejected transition. The record is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from '{from}' on '{event}'")]
pub struct TransitionError {
    pub from: VideoStatus,
    pub event: &'static str,
}

impl VideoStatus {
    /// Target status for `event`, or `None` if the edge does not exist.
    pub fn next(self, event: &VideoEvent) -> Option<VideoStatus> {
        use VideoEvent::*;
        use VideoStatus::*;

        match (self, event) {
            (Pending, UploadConfirmed) => Some(Uploaded),
            (Uploaded, ProcessingStarted) => Some(Processing),
            (Processing, ProgressUpdated) => Some(Processing),
            (Processing, AnalysisCompleted) => Some(Completed),
            (Processing, ProcessingFailed(_)) => Some(Failed),
            (Processing, WatchdogTimeout) => Some(Failed),
            _ => None,
        }
    }
}

impl VideoRecord {
    /// Apply an event, running the side effects of the transition.
    pub fn apply(&mut self, event: VideoEvent) -> Result<VideoStatus, TransitionError> {
        self.apply_at(event, Utc::now())
    }

    /// Apply an event with an explicit clock.
    pub fn apply_at(
        &mut self,
        event: VideoEvent,
        now: DateTime<Utc>,
    ) -> Result<VideoStatus, TransitionError> {
        let to = self.status.next(&event).ok_or(TransitionError {
            from: self.status,
            event: event.name(),
        })?;

        match event {
            VideoEvent::UploadConfirmed | VideoEvent::ProgressUpdated => {}
            VideoEvent::ProcessingStarted => {
                self.processing_started_at = Some(now);
                self.processing_completed_at = None;
                self.error_message = None;
            }
            VideoEvent::AnalysisCompleted => {
                self.processing_completed_at = Some(now);
                self.error_message = None;
                self.clear_working_memory();
            }
            VideoEvent::ProcessingFailed(message) => {
                self.processing_completed_at = Some(now);
                self.error_message = Some(message);
                self.clear_working_memory();
            }
            VideoEvent::WatchdogTimeout => {
                self.processing_completed_at = Some(now);
                self.error_message = Some(WATCHDOG_TIMEOUT_MESSAGE.to_string());
                self.clear_working_memory();
            }
        }

        self.status = to;
        self.updated_at = now;
        Ok(to)
    }

    // pending_jobs may only be non-empty while processing
    fn clear_working_memory(&mut self) {
        self.pending_jobs.clear();
        self.staged.clear();
    }
}
