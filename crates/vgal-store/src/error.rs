//! Store error types.

use thiserror::Error;
use vgal_models::TransitionError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Video already exists: {0}")]
    AlreadyExists(String),

    #[error("Revision conflict: {0}")]
    Conflict(String),

    #[error("Update rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(video_id: impl Into<String>) -> Self {
        Self::NotFound(video_id.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgal_models::VideoStatus;

    #[test]
    fn test_classification() {
        assert!(StoreError::Conflict("rev 3".into()).is_retryable());
        assert!(StoreError::not_found("v1").is_not_found());
        assert!(!StoreError::not_found("v1").is_retryable());

        let err: StoreError = TransitionError {
            from: VideoStatus::Completed,
            event: "progress_updated",
        }
        .into();
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "invalid transition from 'completed' on 'progress_updated'"
        );
    }
}
