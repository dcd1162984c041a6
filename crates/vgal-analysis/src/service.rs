//! Capability traits consumed by the orchestrator.
//!
//! Implementations must be stateless adapters: the same instance is shared by
//! every in-flight video.

use async_trait::async_trait;

use vgal_models::{Entity, JobHandle, JobKind, JobPoll, MediaRef, SentimentAnalysis};

use crate::error::AnalysisResult;

/// Submit and poll asynchronous video analysis jobs.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Start a job of `kind` on the given media.
    ///
    /// `job_name` must be unique per submission; providers that name jobs
    /// (transcription) use it as the job identifier.
    async fn submit(&self, kind: JobKind, media: &MediaRef, job_name: &str)
        -> AnalysisResult<JobHandle>;

    /// Observe the state of a previously submitted job.
    async fn poll(&self, kind: JobKind, handle: &JobHandle) -> AnalysisResult<JobPoll>;

    async fn submit_label_detection(&self, media: &MediaRef) -> AnalysisResult<JobHandle> {
        self.submit(JobKind::LabelDetection, media, "").await
    }

    async fn submit_face_detection(&self, media: &MediaRef) -> AnalysisResult<JobHandle> {
        self.submit(JobKind::FaceDetection, media, "").await
    }

    async fn submit_content_moderation(&self, media: &MediaRef) -> AnalysisResult<JobHandle> {
        self.submit(JobKind::ContentModeration, media, "").await
    }

    async fn submit_transcription(
        &self,
        media: &MediaRef,
        job_name: &str,
    ) -> AnalysisResult<JobHandle> {
        self.submit(JobKind::Transcription, media, job_name).await
    }

    async fn poll_label_detection(&self, handle: &JobHandle) -> AnalysisResult<JobPoll> {
        self.poll(JobKind::LabelDetection, handle).await
    }

    async fn poll_face_detection(&self, handle: &JobHandle) -> AnalysisResult<JobPoll> {
        self.poll(JobKind::FaceDetection, handle).await
    }

    async fn poll_content_moderation(&self, handle: &JobHandle) -> AnalysisResult<JobPoll> {
        self.poll(JobKind::ContentModeration, handle).await
    }

    async fn poll_transcription(&self, handle: &JobHandle) -> AnalysisResult<JobPoll> {
        self.poll(JobKind::Transcription, handle).await
    }
}

/// Synchronous text analysis (sentiment, key phrases, entities).
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn sentiment(&self, text: &str) -> AnalysisResult<SentimentAnalysis>;

    async fn key_phrases(&self, text: &str) -> AnalysisResult<Vec<String>>;

    async fn entities(&self, text: &str) -> AnalysisResult<Vec<Entity>>;
}
