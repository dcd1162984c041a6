//! Job executor.
//!
//! Runs the worker's four loops until shutdown:
//! - ingest: consume `AnalyzeVideoJob`s and start their pipelines
//! - claim: take over ingest jobs orphaned by crashed workers
//! - the re-check driver
//! - the stale video watchdog

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use vgal_models::VideoStatus;
use vgal_queue::{AnalyzeVideoJob, JobQueue};

use crate::config::WorkerConfig;
use crate::driver::RecheckDriver;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::Orchestrator;
use crate::watchdog::StaleVideoWatchdog;

/// What to do with an ingest message once its start attempt returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done (started, failed or nothing to do).
    Ack,
    /// Leave pending; redelivered after the visibility timeout.
    Retry,
    /// Park in the dead letter stream.
    DeadLetter,
}

impl Disposition {
    pub fn of(result: &OrchestratorResult<VideoStatus>) -> Self {
        match result {
            Ok(_) => Disposition::Ack,
            Err(OrchestratorError::NotFound(_)) | Err(OrchestratorError::InvalidState { .. }) => {
                Disposition::Ack
            }
            Err(e) if e.is_transient() => Disposition::Retry,
            Err(_) => Disposition::DeadLetter,
        }
    }
}

pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    orchestrator: Arc<Orchestrator>,
    driver: RecheckDriver,
    watchdog: Arc<StaleVideoWatchdog>,
    start_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: JobQueue,
        orchestrator: Arc<Orchestrator>,
        driver: RecheckDriver,
        watchdog: StaleVideoWatchdog,
        consumer_name: impl Into<String>,
    ) -> Self {
        let start_semaphore = Arc::new(Semaphore::new(config.max_concurrent_starts.max(1)));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            queue: Arc::new(queue),
            orchestrator,
            driver,
            watchdog: Arc::new(watchdog),
            start_semaphore,
            shutdown,
            consumer_name: consumer_name.into(),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until `shutdown` is called, then drain in-flight work.
    pub async fn run(&self) -> OrchestratorResult<()> {
        info!(
            "Starting job executor '{}' ({} concurrent starts, {} concurrent re-checks)",
            self.consumer_name,
            self.config.max_concurrent_starts,
            self.config.max_concurrent_rechecks
        );

        self.queue.init().await?;

        let claim_task = tokio::spawn(Self::claim_loop(
            Arc::clone(&self.queue),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.start_semaphore),
            self.consumer_name.clone(),
            self.config.claim_interval,
            self.shutdown.subscribe(),
        ));

        let driver_task = tokio::spawn({
            let driver = self.driver.clone();
            let shutdown = self.shutdown.subscribe();
            async move { driver.run(shutdown).await }
        });

        let watchdog_task = tokio::spawn({
            let watchdog = Arc::clone(&self.watchdog);
            let shutdown = self.shutdown.subscribe();
            async move { watchdog.run(shutdown).await }
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        let _ = driver_task.await;
        let _ = watchdog_task.await;

        info!("Waiting for in-flight work to complete...");
        let timeout = self.config.shutdown_timeout;
        let starts_drained =
            tokio::time::timeout(timeout, self.wait_for_starts()).await.is_ok();
        let rechecks_drained = self.driver.wait_idle(timeout).await;
        if !starts_drained || !rechecks_drained {
            // leases and pending entries hand the rest to the next worker
            warn!("Shutdown timeout reached with work still in flight");
        }

        info!("Job executor stopped");
        Ok(())
    }

    async fn consume_jobs(&self) -> OrchestratorResult<()> {
        let available = self.start_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            Self::spawn_start(
                Arc::clone(&self.orchestrator),
                Arc::clone(&self.queue),
                Arc::clone(&self.start_semaphore),
                message_id,
                job,
            )
            .await;
        }

        Ok(())
    }

    async fn claim_loop(
        queue: Arc<JobQueue>,
        orchestrator: Arc<Orchestrator>,
        semaphore: Arc<Semaphore>,
        consumer_name: String,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match queue.claim_pending(&consumer_name, 5).await {
                        Ok(jobs) if !jobs.is_empty() => {
                            info!("Claimed {} pending jobs", jobs.len());
                            for (message_id, job) in jobs {
                                Self::spawn_start(
                                    Arc::clone(&orchestrator),
                                    Arc::clone(&queue),
                                    Arc::clone(&semaphore),
                                    message_id,
                                    job,
                                )
                                .await;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to claim pending jobs: {}", e),
                    }
                }
            }
        }
    }

    async fn spawn_start(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<JobQueue>,
        semaphore: Arc<Semaphore>,
        message_id: String,
        job: AnalyzeVideoJob,
    ) {
        let permit = match semaphore.acquire_owned().await {
            Ok(p) => p,
            // unacked: redelivered to another consumer
            Err(_) => return,
        };

        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_job(orchestrator, queue, message_id, job).await;
        });
    }

    async fn execute_job(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<JobQueue>,
        message_id: String,
        job: AnalyzeVideoJob,
    ) {
        info!(
            video_id = %job.video_id,
            "Executing analyze job {}", job.job_id
        );

        let result = orchestrator.start(&job.video_id).await;

        match Disposition::of(&result) {
            Disposition::Ack => {
                match &result {
                    Ok(status) => info!(
                        video_id = %job.video_id,
                        "Analyze job {} started video ({})", job.job_id, status
                    ),
                    Err(e) => warn!(
                        video_id = %job.video_id,
                        "Analyze job {} skipped: {}", job.job_id, e
                    ),
                }
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job.job_id, e);
                }
            }
            Disposition::Retry => {
                let error = result.err().map(|e| e.to_string()).unwrap_or_default();
                let retry_count = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                let max_retries = queue.max_retries();

                if retry_count >= max_retries {
                    warn!(
                        "Job {} exceeded max retries ({}), moving to DLQ",
                        job.job_id, max_retries
                    );
                    Self::dead_letter(&queue, &message_id, &job, &error).await;
                } else {
                    info!(
                        "Job {} will be retried (attempt {}/{}): {}",
                        job.job_id, retry_count, max_retries, error
                    );
                }
            }
            Disposition::DeadLetter => {
                let error = result.err().map(|e| e.to_string()).unwrap_or_default();
                error!("Job {} failed: {}", job.job_id, error);
                Self::dead_letter(&queue, &message_id, &job, &error).await;
            }
        }
    }

    async fn dead_letter(queue: &JobQueue, message_id: &str, job: &AnalyzeVideoJob, error: &str) {
        if let Err(e) = queue.dlq(message_id, job, error).await {
            error!("Failed to move job {} to DLQ: {}", job.job_id, e);
        }
        // allow a manual re-enqueue
        if let Err(e) = queue.clear_dedup(job).await {
            warn!("Failed to clear dedup key for job {}: {}", job.job_id, e);
        }
    }

    async fn wait_for_starts(&self) {
        let total = self.config.max_concurrent_starts.max(1);
        while self.start_semaphore.available_permits() != total {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgal_analysis::AnalysisError;
    use vgal_queue::QueueError;
    use vgal_store::StoreError;

    #[test]
    fn test_disposition() {
        assert_eq!(Disposition::of(&Ok(VideoStatus::Processing)), Disposition::Ack);
        assert_eq!(Disposition::of(&Ok(VideoStatus::Failed)), Disposition::Ack);
        assert_eq!(
            Disposition::of(&Err(OrchestratorError::NotFound("v1".into()))),
            Disposition::Ack
        );
        assert_eq!(
            Disposition::of(&Err(OrchestratorError::InvalidState {
                video_id: "v1".into(),
                status: VideoStatus::Completed,
                expected: VideoStatus::Uploaded,
            })),
            Disposition::Ack
        );
        assert_eq!(
            Disposition::of(&Err(StoreError::Conflict("v1".into()).into())),
            Disposition::Retry
        );
        assert_eq!(
            Disposition::of(&Err(QueueError::ConnectionFailed("down".into()).into())),
            Disposition::Retry
        );
        assert_eq!(
            Disposition::of(&Err(AnalysisError::request_failed("400").into())),
            Disposition::DeadLetter
        );
    }
}
