//! Video analysis orchestrator.
//!
//! Drives one video from `uploaded` to `completed` or `failed`:
//!
//! 1. `start`: move to `processing`, submit the four analysis jobs, persist
//!    their handles and schedule the first re-check.
//! 2. `recheck`: poll every pending job, stage finished results, and either
//!    ask for another re-check or merge and complete the video.
//!
//! All working state lives on the record, so any worker can run the next
//! re-check of any video.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn, Instrument};

use vgal_analysis::{AnalysisError, AnalysisResult, JobClient, TextAnalyzer};
use vgal_models::{
    AnalysisJob, JobHandle, JobKind, JobPayload, JobPoll, MediaRef, Notification,
    SentimentAnalysis, SentimentScores, StagedPayload, StagedTranscript, TextInsights,
    Transcript, VideoEvent, VideoId, VideoRecord, VideoStatus,
};
use vgal_queue::{NotificationSink, RecheckJob, RecheckQueue};
use vgal_store::{StoreError, VideoStore};

use crate::driver::{RecheckHandler, RecheckOutcome};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::VideoLogger;
use crate::merger::{merge_if_ready, text_for_analysis, MergeVerdict};
use crate::metrics;
use crate::retry::{retry_async, RetryConfig};


/// Progress milestones, in percent.
pub mod progress {
    pub const STARTED: u8 = 10;
    pub const SUBMITTED: u8 = 25;
    /// Added to `SUBMITTED` for every settled job kind.
    pub const PER_SETTLED_KIND: u8 = 10;
    pub const ANALYZED: u8 = 75;
    pub const MERGING: u8 = 85;
    pub const SAVING: u8 = 95;
    pub const COMPLETED: u8 = 100;
}

/// Outcome of polling one pending job.
#[derive(Debug, Clone)]
enum Settled {
    Staged(StagedPayload),
    /// Tolerated failure of a non-critical kind.
    Failed(JobKind),
}

impl Settled {
    fn kind(&self) -> JobKind {
        match self {
            Settled::Staged(payload) => payload.kind(),
            Settled::Failed(kind) => *kind,
        }
    }
}

pub struct Orchestrator {
    jobs: Arc<dyn JobClient>,
    text: Arc<dyn TextAnalyzer>,
    store: Arc<dyn VideoStore>,
    notifier: Arc<dyn NotificationSink>,
    rechecks: Arc<dyn RecheckQueue>,
    recheck_delay: Duration,
    write_retry: RetryConfig,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobClient>,
        text: Arc<dyn TextAnalyzer>,
        store: Arc<dyn VideoStore>,
        notifier: Arc<dyn NotificationSink>,
        rechecks: Arc<dyn RecheckQueue>,
    ) -> Self {
        Self {
            jobs,
            text,
            store,
            notifier,
            rechecks,
            recheck_delay: Duration::from_secs(30),
            write_retry: RetryConfig::new("fail_video").with_max_retries(3),
        }
    }

    /// Delay before each re-check.
    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    pub fn with_write_retry(mut self, config: RetryConfig) -> Self {
        self.write_retry = config;
        self
    }

    pub fn recheck_delay(&self) -> Duration {
        self.recheck_delay
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start the pipeline for an uploaded video.
    ///
    /// Returns the status the video is left in: `processing` once the jobs
    /// are submitted, `failed` if the start itself failed. A video that is
    /// not `uploaded` is rejected without being touched.
    pub async fn start(&self, video_id: &VideoId) -> OrchestratorResult<VideoStatus> {
        let logger = VideoLogger::new(video_id, "start");
        let span = logger.create_span();
        self.run_start(video_id, &logger).instrument(span).await
    }

    async fn run_start(
        &self,
        video_id: &VideoId,
        logger: &VideoLogger,
    ) -> OrchestratorResult<VideoStatus> {
        let record = self.store.get_required(video_id).await?;
        if record.status != VideoStatus::Uploaded {
            return Err(OrchestratorError::InvalidState {
                video_id: video_id.to_string(),
                status: record.status,
                expected: VideoStatus::Uploaded,
            });
        }

        let record = match self
            .store
            .update(video_id, &mut |rec| {
                rec.apply(VideoEvent::ProcessingStarted)?;
                rec.advance_progress(progress::STARTED);
                Ok(())
            })
            .await
        {
            Ok(rec) => rec,
            // another worker won the start
            Err(StoreError::Transition(e)) => {
                return Err(OrchestratorError::InvalidState {
                    video_id: video_id.to_string(),
                    status: e.from,
                    expected: VideoStatus::Uploaded,
                })
            }
            Err(e) => return Err(e.into()),
        };

        logger.log_start(&format!("media {}", record.media_ref));
        self.notify(
            &record.user_id,
            Notification::progress(
                video_id.clone(),
                "Starting video analysis",
                progress::STARTED,
            ),
        )
        .await;

        match self.submit_and_schedule(&record, logger).await {
            Ok(()) => Ok(VideoStatus::Processing),
            Err(e) => {
                self.fail(video_id, &record.user_id, &e).await?;
                Ok(VideoStatus::Failed)
            }
        }
    }

    async fn submit_and_schedule(
        &self,
        record: &VideoRecord,
        logger: &VideoLogger,
    ) -> OrchestratorResult<()> {
        let video_id = &record.video_id;
        let job_name = transcription_job_name(video_id);

        let submissions = JobKind::ALL.iter().map(|&kind| {
            let media = &record.media_ref;
            let job_name = job_name.as_str();
            async move { (kind, self.submit_kind(kind, media, job_name).await) }
        });

        let mut submitted = Vec::new();
        let mut failed = Vec::new();
        for (kind, result) in join_all(submissions).await {
            match result {
                Ok(handle) => {
                    debug!(video_id = %video_id, job_kind = %kind, "Submitted {}", handle);
                    submitted.push(AnalysisJob::new(kind, handle));
                }
                Err(e) if kind.is_critical() => {
                    logger.log_error(&format!("{} submission failed: {}", kind, e));
                    return Err(OrchestratorError::Service(e));
                }
                Err(e) => {
                    logger.log_warning(&format!("{} submission failed, skipping: {}", kind, e));
                    metrics::record_job_settled(kind.as_str(), "failed");
                    failed.push(kind);
                }
            }
        }

        let record = self
            .store
            .update(video_id, &mut |rec| {
                rec.apply(VideoEvent::ProgressUpdated)?;
                for job in &submitted {
                    rec.pending_jobs.insert(job.clone());
                }
                for kind in &failed {
                    rec.staged.mark_failed(*kind);
                }
                rec.advance_progress(progress::SUBMITTED);
                Ok(())
            })
            .await?;

        logger.log_progress(&format!("{} analysis jobs submitted", submitted.len()));
        self.notify(
            &record.user_id,
            Notification::progress(
                video_id.clone(),
                "Analysis jobs submitted",
                progress::SUBMITTED,
            ),
        )
        .await;

        let first = RecheckJob::first(video_id.clone(), record.user_id.clone());
        if !self.rechecks.schedule(first, self.recheck_delay).await? {
            debug!(video_id = %video_id, "Re-check already scheduled");
        }

        Ok(())
    }

    async fn submit_kind(
        &self,
        kind: JobKind,
        media: &MediaRef,
        job_name: &str,
    ) -> AnalysisResult<JobHandle> {
        match kind {
            JobKind::LabelDetection => self.jobs.submit_label_detection(media).await,
            JobKind::FaceDetection => self.jobs.submit_face_detection(media).await,
            JobKind::ContentModeration => self.jobs.submit_content_moderation(media).await,
            JobKind::Transcription => self.jobs.submit_transcription(media, job_name).await,
        }
    }

    // ========================================================================
    // Re-check
    // ========================================================================

    /// Poll the pending jobs of a video and advance it.
    ///
    /// Idempotent: a video that is no longer `processing` is left alone.
    pub async fn recheck(&self, job: &RecheckJob) -> OrchestratorResult<RecheckOutcome> {
        let logger = VideoLogger::new(&job.video_id, "recheck");
        let span = logger.create_span();
        self.run_recheck(job, &logger).instrument(span).await
    }

    async fn run_recheck(
        &self,
        job: &RecheckJob,
        logger: &VideoLogger,
    ) -> OrchestratorResult<RecheckOutcome> {
        let record = self
            .store
            .get(&job.video_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(job.video_id.to_string()))?;

        if record.status != VideoStatus::Processing {
            debug!(
                video_id = %job.video_id,
                status = %record.status,
                "Video no longer processing, dropping re-check"
            );
            return Ok(RecheckOutcome::Finished);
        }

        logger.log_progress(&format!(
            "re-check {} with {} pending jobs",
            job.attempt,
            record.pending_jobs.len()
        ));

        let mut settled = Vec::new();
        for pending in record.pending_jobs.jobs() {
            match self.poll_job(pending, logger).await {
                Ok(Some(s)) => settled.push(s),
                Ok(None) => {}
                Err(e) => {
                    self.fail(&record.video_id, &record.user_id, &e).await?;
                    return Ok(RecheckOutcome::Finished);
                }
            }
        }

        let mut raised = None;
        let updated = match self
            .store
            .update(&record.video_id, &mut |rec| {
                rec.apply(VideoEvent::ProgressUpdated)?;
                for s in &settled {
                    rec.pending_jobs.remove(s.kind());
                    match s {
                        Settled::Staged(payload) => rec.staged.insert(payload.clone()),
                        Settled::Failed(kind) => rec.staged.mark_failed(*kind),
                    }
                }
                raised = rec.advance_progress(settled_progress(rec.staged.settled_count()));
                Ok(())
            })
            .await
        {
            Ok(rec) => rec,
            // terminated while we were polling
            Err(StoreError::Transition(_)) => return Ok(RecheckOutcome::Finished),
            Err(e) => return Err(e.into()),
        };

        for s in &settled {
            let outcome = match s {
                Settled::Staged(_) => "staged",
                Settled::Failed(_) => "failed",
            };
            metrics::record_job_settled(s.kind().as_str(), outcome);
        }

        if let Some(value) = raised {
            self.notify(
                &updated.user_id,
                Notification::progress(
                    updated.video_id.clone(),
                    format!(
                        "Analysis in progress ({}/{} finished)",
                        updated.staged.settled_count(),
                        JobKind::ALL.len()
                    ),
                    value,
                ),
            )
            .await;
        }

        if !updated.pending_jobs.is_empty() {
            debug!(
                video_id = %updated.video_id,
                pending = ?updated.pending_jobs.kinds(),
                "Jobs still running"
            );
            return Ok(RecheckOutcome::RetryScheduled);
        }

        self.complete(&updated, logger).await
    }

    /// Poll one job. `Ok(None)` means it is still running (or the poll hit a
    /// transient error and should be retried on the next re-check).
    async fn poll_job(
        &self,
        job: &AnalysisJob,
        logger: &VideoLogger,
    ) -> OrchestratorResult<Option<Settled>> {
        let kind = job.kind;
        let polled = match kind {
            JobKind::LabelDetection => self.jobs.poll_label_detection(&job.handle).await,
            JobKind::FaceDetection => self.jobs.poll_face_detection(&job.handle).await,
            JobKind::ContentModeration => self.jobs.poll_content_moderation(&job.handle).await,
            JobKind::Transcription => self.jobs.poll_transcription(&job.handle).await,
        };

        match polled {
            Ok(JobPoll::Pending) => Ok(None),
            Ok(JobPoll::Succeeded(payload)) => self.stage(kind, payload, logger).await,
            Ok(JobPoll::Failed { reason }) => tolerate(kind, reason, logger),
            Err(e) if e.is_retryable() => {
                logger.log_warning(&format!("polling {} failed, will retry: {}", kind, e));
                Ok(None)
            }
            Err(e) if kind.is_critical() => Err(OrchestratorError::Service(e)),
            Err(e) => tolerate(kind, e.to_string(), logger),
        }
    }

    async fn stage(
        &self,
        kind: JobKind,
        payload: JobPayload,
        logger: &VideoLogger,
    ) -> OrchestratorResult<Option<Settled>> {
        if payload.kind() != kind {
            let e = AnalysisError::invalid_response(format!(
                "{} job returned a {} payload",
                kind,
                payload.kind()
            ));
            return if kind.is_critical() {
                Err(e.into())
            } else {
                tolerate(kind, e.to_string(), logger)
            };
        }

        let staged = match payload {
            JobPayload::Labels(labels) => StagedPayload::Labels(labels),
            JobPayload::Faces(faces) => StagedPayload::Faces(faces),
            JobPayload::Moderation(labels) => StagedPayload::Moderation(labels),
            JobPayload::Transcript(transcript) => match self.analyze_text(&transcript).await {
                Ok(insights) => StagedPayload::Transcription(StagedTranscript {
                    transcript,
                    insights,
                }),
                Err(e) if e.is_retryable() => {
                    logger.log_warning(&format!("text analysis failed, will retry: {}", e));
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            },
        };

        logger.log_progress(&format!("{} results staged", kind));
        Ok(Some(Settled::Staged(staged)))
    }

    async fn analyze_text(&self, transcript: &Transcript) -> AnalysisResult<TextInsights> {
        let text = text_for_analysis(&transcript.text);
        if text.trim().is_empty() {
            return Ok(empty_insights());
        }

        let (sentiment, key_phrases, entities) = tokio::try_join!(
            self.text.sentiment(text),
            self.text.key_phrases(text),
            self.text.entities(text),
        )?;

        Ok(TextInsights {
            sentiment,
            key_phrases,
            entities,
        })
    }

    async fn complete(
        &self,
        record: &VideoRecord,
        logger: &VideoLogger,
    ) -> OrchestratorResult<RecheckOutcome> {
        let video_id = &record.video_id;

        for (value, message) in [
            (progress::ANALYZED, "All analyses finished"),
            (progress::MERGING, "Merging analysis results"),
            (progress::SAVING, "Saving analysis results"),
        ] {
            if !self.advance(record, value, message).await? {
                return Ok(RecheckOutcome::Finished);
            }
        }

        let completed = match self
            .store
            .update(video_id, &mut |rec| {
                match merge_if_ready(&rec.pending_jobs, &rec.staged, &rec.tags, &rec.categories) {
                    MergeVerdict::NotReady(kinds) => Err(StoreError::rejected(format!(
                        "jobs still pending: {:?}",
                        kinds
                    ))),
                    MergeVerdict::Ready(merged) => {
                        merged.apply_to(rec);
                        rec.apply(VideoEvent::AnalysisCompleted)?;
                        rec.advance_progress(progress::COMPLETED);
                        Ok(())
                    }
                }
            })
            .await
        {
            Ok(rec) => rec,
            Err(StoreError::Transition(_)) => return Ok(RecheckOutcome::Finished),
            Err(StoreError::Rejected(reason)) => {
                warn!(video_id = %video_id, "Merge deferred: {}", reason);
                return Ok(RecheckOutcome::RetryScheduled);
            }
            Err(e) => return Err(e.into()),
        };

        logger.log_completion(&format!(
            "{} tags, {} categories",
            completed.tags.len(),
            completed.categories.len()
        ));
        metrics::record_video_completed();

        self.notify(
            &completed.user_id,
            Notification::progress(video_id.clone(), "Analysis complete", progress::COMPLETED),
        )
        .await;
        self.notify(&completed.user_id, Notification::completed(&completed))
            .await;

        Ok(RecheckOutcome::Finished)
    }

    /// Persist a progress milestone and notify if it moved forward.
    ///
    /// Returns `false` if the video left `processing` meanwhile.
    async fn advance(
        &self,
        record: &VideoRecord,
        value: u8,
        message: &str,
    ) -> OrchestratorResult<bool> {
        let mut raised = None;
        match self
            .store
            .update(&record.video_id, &mut |rec| {
                rec.apply(VideoEvent::ProgressUpdated)?;
                raised = rec.advance_progress(value);
                Ok(())
            })
            .await
        {
            Ok(_) => {}
            Err(StoreError::Transition(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        if let Some(value) = raised {
            self.notify(
                &record.user_id,
                Notification::progress(record.video_id.clone(), message, value),
            )
            .await;
        }
        Ok(true)
    }

    // ========================================================================
    // Failure
    // ========================================================================

    /// Move a video to `failed` and tell its owner.
    ///
    /// A video that already reached a terminal state is left alone.
    pub async fn fail(
        &self,
        video_id: &VideoId,
        user_id: &str,
        error: &OrchestratorError,
    ) -> OrchestratorResult<()> {
        let logger = VideoLogger::new(video_id, "fail");
        let message = error.to_string();
        let store = &self.store;
        let msg = message.as_str();

        let result = retry_async(
            &self.write_retry,
            || async move {
                store
                    .update(video_id, &mut |rec| {
                        rec.apply(VideoEvent::ProcessingFailed(msg.to_string()))?;
                        Ok(())
                    })
                    .await
            },
            StoreError::is_retryable,
        )
        .await
        .into_result();

        match result {
            Ok(_) => {
                logger.log_error(&message);
                metrics::record_video_failed(error.reason());
                self.notify(user_id, Notification::failed(video_id.clone(), message))
                    .await;
                Ok(())
            }
            Err(StoreError::Transition(e)) => {
                debug!(video_id = %video_id, "Not failing video: {}", e);
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                warn!(video_id = %video_id, "Video vanished before it could be failed");
                Ok(())
            }
            Err(e) => {
                logger.log_error(&format!("could not record failure '{}': {}", message, e));
                Err(e.into())
            }
        }
    }

    /// Best-effort delivery: a lost notification never affects the pipeline.
    async fn notify(&self, user_id: &str, notification: Notification) {
        if let Err(e) = self.notifier.publish(user_id, &notification).await {
            warn!(
                video_id = %notification.video_id(),
                event = notification.event_name(),
                "Failed to publish notification: {}", e
            );
        }
    }
}

#[async_trait]
impl RecheckHandler for Orchestrator {
    async fn recheck(&self, job: &RecheckJob) -> OrchestratorResult<RecheckOutcome> {
        Orchestrator::recheck(self, job).await
    }

    async fn exhausted(&self, job: &RecheckJob) {
        let error = OrchestratorError::Timeout(job.attempt);
        info!(video_id = %job.video_id, "Analysis timed out after {} re-checks", job.attempt);
        if let Err(e) = self.fail(&job.video_id, &job.user_id, &error).await {
            warn!(video_id = %job.video_id, "Failed to record timeout: {}", e);
        }
    }

    async fn failed(&self, job: &RecheckJob, error: &OrchestratorError) {
        if matches!(error, OrchestratorError::NotFound(_)) {
            return;
        }
        if let Err(e) = self.fail(&job.video_id, &job.user_id, error).await {
            warn!(video_id = %job.video_id, "Failed to record re-check failure: {}", e);
        }
    }
}

fn tolerate(
    kind: JobKind,
    reason: String,
    logger: &VideoLogger,
) -> OrchestratorResult<Option<Settled>> {
    if kind.is_critical() {
        return Err(OrchestratorError::job_failed(kind, reason));
    }
    logger.log_warning(&format!("{} job failed, continuing without it: {}", kind, reason));
    Ok(Some(Settled::Failed(kind)))
}

/// Unique per submission; the transcription provider names jobs by it.
fn transcription_job_name(video_id: &VideoId) -> String {
    format!("transcribe-{}-{}", video_id, Utc::now().timestamp())
}

fn settled_progress(settled: usize) -> u8 {
    let settled = settled.min(JobKind::ALL.len()) as u8;
    progress::SUBMITTED + progress::PER_SETTLED_KIND * settled
}

fn empty_insights() -> TextInsights {
    TextInsights {
        sentiment: SentimentAnalysis {
            sentiment: "NEUTRAL".to_string(),
            scores: SentimentScores {
                neutral: 1.0,
                ..Default::default()
            },
        },
        key_phrases: Vec::new(),
        entities: Vec::new(),
    }
}
