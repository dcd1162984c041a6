//! Structured video logging utilities.

use tracing::{error, info, warn, Span};
use vgal_models::VideoId;

/// Logger for one video's pipeline step, with consistent fields.
#[derive(Debug, Clone)]
pub struct VideoLogger {
    video_id: String,
    operation: String,
}

impl VideoLogger {
    /// `operation` names the step, e.g. "start" or "recheck".
    pub fn new(video_id: &VideoId, operation: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video completed: {}", message
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the video id, for instrumenting a whole step.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "video",
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_logger_fields() {
        let logger = VideoLogger::new(&VideoId::from("v1"), "recheck");
        assert_eq!(logger.video_id(), "v1");
        assert_eq!(logger.operation(), "recheck");
    }
}
