//! Worker error types.

use thiserror::Error;

use vgal_analysis::AnalysisError;
use vgal_models::{JobKind, VideoStatus};
use vgal_queue::QueueError;
use vgal_store::StoreError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Video {video_id} is {status}, expected {expected}")]
    InvalidState {
        video_id: String,
        status: VideoStatus,
        expected: VideoStatus,
    },

    #[error("Analysis service error: {0}")]
    Service(#[from] AnalysisError),

    #[error("{kind} job failed: {reason}")]
    JobFailed { kind: JobKind, reason: String },

    #[error("Analysis timed out after {0} re-checks")]
    Timeout(u32),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            other => OrchestratorError::Store(other),
        }
    }
}

impl OrchestratorError {
    pub fn job_failed(kind: JobKind, reason: impl Into<String>) -> Self {
        Self::JobFailed {
            kind,
            reason: reason.into(),
        }
    }

    /// Infrastructure hiccup: the same step may succeed if run again later.
    ///
    /// Transient errors never fail a video; everything else does.
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::Store(e) => e.is_retryable(),
            OrchestratorError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::InvalidState { .. } => "invalid_state",
            OrchestratorError::Service(_) => "service",
            OrchestratorError::JobFailed { .. } => "job_failed",
            OrchestratorError::Timeout(_) => "timeout",
            OrchestratorError::Store(_) => "store",
            OrchestratorError::Queue(_) => "queue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: OrchestratorError = StoreError::not_found("v1").into();
        assert!(matches!(err, OrchestratorError::NotFound(ref id) if id == "v1"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            OrchestratorError::Timeout(10).to_string(),
            "Analysis timed out after 10 re-checks"
        );
        assert_eq!(
            OrchestratorError::job_failed(JobKind::Transcription, "bad audio").to_string(),
            "transcription job failed: bad audio"
        );
    }

    #[test]
    fn test_conflict_is_transient() {
        let err: OrchestratorError = StoreError::Conflict("rev".into()).into();
        assert!(err.is_transient());
        assert_eq!(err.reason(), "store");
    }
}
