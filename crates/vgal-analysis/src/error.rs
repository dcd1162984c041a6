//! Analysis client error types.

use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Failure of an external analysis dependency.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analysis service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Transient failures worth another attempt later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::ServiceUnavailable(_)
                | AnalysisError::Timeout(_)
                | AnalysisError::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AnalysisError::ServiceUnavailable("503".into()).is_retryable());
        assert!(AnalysisError::Timeout(30).is_retryable());
        assert!(!AnalysisError::request_failed("400").is_retryable());
        assert!(!AnalysisError::JobNotFound("job-1".into()).is_retryable());
        assert!(!AnalysisError::invalid_response("bad").is_retryable());
    }
}
