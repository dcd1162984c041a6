//! Re-check driver.
//!
//! Polls the re-check queue and runs due re-checks on a bounded pool. The
//! delay between two re-checks is spent in the queue, never on a worker
//! task or a pool permit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use vgal_queue::{QueueResult, RecheckJob, RecheckQueue};

use crate::config::WorkerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;
use crate::retry::FailureTracker;

/// Result of one re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecheckOutcome {
    /// The video reached a terminal state or no longer needs re-checking.
    Finished,
    /// Jobs are still running; re-check again after the delay.
    RetryScheduled,
}

/// Idempotent callback invoked for every due re-check.
#[async_trait]
pub trait RecheckHandler: Send + Sync {
    async fn recheck(&self, job: &RecheckJob) -> OrchestratorResult<RecheckOutcome>;

    /// Called instead of rescheduling once the attempt budget is spent.
    async fn exhausted(&self, job: &RecheckJob);

    /// Called when `recheck` returned a non-transient error. The entry is
    /// released afterwards, so this is the last chance to record the failure.
    async fn failed(&self, job: &RecheckJob, error: &OrchestratorError);
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub delay: Duration,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub max_concurrent: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for DriverConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            delay: config.recheck_delay,
            max_attempts: config.max_rechecks,
            poll_interval: config.recheck_poll_interval,
            max_concurrent: config.max_concurrent_rechecks.max(1),
        }
    }
}

#[derive(Clone)]
pub struct RecheckDriver {
    queue: Arc<dyn RecheckQueue>,
    handler: Arc<dyn RecheckHandler>,
    config: DriverConfig,
    semaphore: Arc<Semaphore>,
}

impl RecheckDriver {
    pub fn new(
        queue: Arc<dyn RecheckQueue>,
        handler: Arc<dyn RecheckHandler>,
        config: DriverConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            queue,
            handler,
            config,
            semaphore,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Poll until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Re-check driver started (delay {:?}, max attempts {}, concurrency {})",
            self.config.delay, self.config.max_attempts, self.config.max_concurrent
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Re-check driver stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(_) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to claim due re-checks: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim as many due re-checks as there are free permits and spawn them.
    pub async fn poll_once(&self) -> QueueResult<usize> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let jobs = self.queue.claim_due(available).await?;
        let claimed = jobs.len();

        for job in jobs {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    // closed semaphore: the lease expires and another worker takes over
                    warn!(video_id = %job.video_id, "Re-check pool closed, dropping claim");
                    continue;
                }
            };
            let driver = self.clone();
            tokio::spawn(async move {
                driver.process(job).await;
                drop(permit);
            });
        }

        Ok(claimed)
    }

    /// Claim due re-checks and run them on the calling task.
    pub async fn drain_due(&self) -> QueueResult<usize> {
        let jobs = self.queue.claim_due(self.config.max_concurrent).await?;
        let claimed = jobs.len();
        for job in jobs {
            self.process(job).await;
        }
        Ok(claimed)
    }

    /// Wait until no re-check is running, up to `timeout`.
    ///
    /// Returns `false` if re-checks were still running at the deadline.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.semaphore.available_permits() == self.config.max_concurrent {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn process(&self, job: RecheckJob) {
        let started = Instant::now();
        debug!(
            video_id = %job.video_id,
            attempt = job.attempt,
            "Running re-check"
        );

        let outcome = match self.handler.recheck(&job).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                warn!(
                    video_id = %job.video_id,
                    attempt = job.attempt,
                    "Re-check hit a transient error, retrying later: {}", e
                );
                RecheckOutcome::RetryScheduled
            }
            Err(e) => {
                error!(
                    video_id = %job.video_id,
                    attempt = job.attempt,
                    "Re-check failed: {}", e
                );
                self.handler.failed(&job, &e).await;
                metrics::record_recheck("error", started.elapsed().as_secs_f64());
                self.complete(&job).await;
                return;
            }
        };

        let label = match outcome {
            RecheckOutcome::Finished => {
                self.complete(&job).await;
                "finished"
            }
            RecheckOutcome::RetryScheduled if job.attempt >= self.config.max_attempts => {
                warn!(
                    video_id = %job.video_id,
                    attempt = job.attempt,
                    "Re-check budget exhausted"
                );
                self.handler.exhausted(&job).await;
                self.complete(&job).await;
                "exhausted"
            }
            RecheckOutcome::RetryScheduled => {
                match self.queue.reschedule(job.next(), self.config.delay).await {
                    Ok(true) => "rescheduled",
                    // another worker owns the video now
                    Ok(false) => "lease_lost",
                    Err(e) => {
                        // lease expiry re-delivers the current attempt
                        warn!(video_id = %job.video_id, "Failed to reschedule re-check: {}", e);
                        "rescheduled"
                    }
                }
            }
        };

        metrics::record_recheck(label, started.elapsed().as_secs_f64());
    }

    async fn complete(&self, job: &RecheckJob) {
        if let Err(e) = self.queue.complete(job).await {
            warn!(video_id = %job.video_id, "Failed to release re-check: {}", e);
        }
    }
}
