//! Worker metrics.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric name constants for consistency.
pub mod names {
    /// Re-checks by outcome (`finished`, `rescheduled`, `exhausted`, `error`).
    pub const RECHECKS_TOTAL: &str = "vgal_rechecks_total";

    /// Analysis jobs settled, by kind and outcome (`staged`, `failed`).
    pub const JOBS_STAGED_TOTAL: &str = "vgal_jobs_staged_total";

    pub const VIDEOS_COMPLETED_TOTAL: &str = "vgal_videos_completed_total";

    /// Failed videos by reason.
    pub const VIDEOS_FAILED_TOTAL: &str = "vgal_videos_failed_total";

    pub const RECHECK_DURATION_SECONDS: &str = "vgal_recheck_duration_seconds";
}

/// Serve Prometheus metrics on `0.0.0.0:{port}`.
///
/// Must be called from within a Tokio runtime.
pub fn install_exporter(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_recheck(outcome: &'static str, duration_secs: f64) {
    counter!(names::RECHECKS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::RECHECK_DURATION_SECONDS).record(duration_secs);
}

pub fn record_job_settled(kind: &'static str, outcome: &'static str) {
    counter!(names::JOBS_STAGED_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_video_completed() {
    counter!(names::VIDEOS_COMPLETED_TOTAL).increment(1);
}

pub fn record_video_failed(reason: &'static str) {
    counter!(names::VIDEOS_FAILED_TOTAL, "reason" => reason).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::RECHECKS_TOTAL.starts_with("vgal_"));
        assert!(names::JOBS_STAGED_TOTAL.ends_with("_total"));
        assert!(names::RECHECK_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_recheck("finished", 0.5);
        record_job_settled("transcription", "staged");
        record_video_completed();
        record_video_failed("timeout");
    }
}
