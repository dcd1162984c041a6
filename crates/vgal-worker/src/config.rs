//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum re-checks running at once
    pub max_concurrent_rechecks: usize,
    /// Maximum pipeline starts running at once
    pub max_concurrent_starts: usize,
    /// Delay between two re-checks of the same video
    pub recheck_delay: Duration,
    /// Re-checks allowed before a video times out
    pub max_rechecks: u32,
    /// How often the re-check queue is polled for due entries
    pub recheck_poll_interval: Duration,
    /// How often the watchdog sweeps for stuck videos
    pub watchdog_interval: Duration,
    /// Time in `processing` after which the watchdog fails a video
    pub processing_timeout: Duration,
    /// How often the worker scans the ingest stream for orphaned jobs
    pub claim_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Port for the Prometheus exporter, disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rechecks: 8,
            max_concurrent_starts: 4,
            recheck_delay: Duration::from_secs(30),
            max_rechecks: 10,
            recheck_poll_interval: Duration::from_millis(1000),
            watchdog_interval: Duration::from_secs(300),
            processing_timeout: Duration::from_secs(2 * 60 * 60),
            claim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_rechecks: std::env::var("WORKER_MAX_RECHECKS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            max_concurrent_starts: std::env::var("WORKER_MAX_STARTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            recheck_delay: Duration::from_secs(
                std::env::var("RECHECK_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_rechecks: std::env::var("RECHECK_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            recheck_poll_interval: Duration::from_millis(
                std::env::var("RECHECK_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            watchdog_interval: Duration::from_secs(
                std::env::var("WATCHDOG_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            processing_timeout: Duration::from_secs(
                std::env::var("PROCESSING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(7200),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.recheck_delay, Duration::from_secs(30));
        assert_eq!(config.max_rechecks, 10);
        assert_eq!(config.processing_timeout, Duration::from_secs(7200));
        assert!(config.metrics_port.is_none());
    }
}
