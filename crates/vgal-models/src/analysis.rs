//! Analysis job kinds, handles and result payloads.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of external analysis job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Object and scene labels
    LabelDetection,
    /// Face descriptors
    FaceDetection,
    /// Unsafe content labels
    ContentModeration,
    /// Speech to text
    Transcription,
}

impl JobKind {
    /// Every kind submitted for a video, in submission order.
    pub const ALL: [JobKind; 4] = [
        JobKind::LabelDetection,
        JobKind::FaceDetection,
        JobKind::ContentModeration,
        JobKind::Transcription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::LabelDetection => "label_detection",
            JobKind::FaceDetection => "face_detection",
            JobKind::ContentModeration => "content_moderation",
            JobKind::Transcription => "transcription",
        }
    }

    /// A failure of a critical kind fails the whole video.
    pub fn is_critical(&self) -> bool {
        matches!(self, JobKind::Transcription)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque external job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Storage reference of an uploaded media file (e.g. `s3://bucket/key.mp4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MediaRef(pub String);

impl MediaRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.0.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_lowercase())
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MediaRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A submitted unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisJob {
    pub kind: JobKind,
    pub handle: JobHandle,
    pub submitted_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(kind: JobKind, handle: JobHandle) -> Self {
        Self {
            kind,
            handle,
            submitted_at: Utc::now(),
        }
    }
}

/// Jobs submitted for a video that have not been staged yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct PendingJobs(BTreeMap<JobKind, AnalysisJob>);

impl PendingJobs {
    pub fn insert(&mut self, job: AnalysisJob) {
        self.0.insert(job.kind, job);
    }

    pub fn remove(&mut self, kind: JobKind) -> Option<AnalysisJob> {
        self.0.remove(&kind)
    }

    pub fn get(&self, kind: JobKind) -> Option<&AnalysisJob> {
        self.0.get(&kind)
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        self.0.keys().copied().collect()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &AnalysisJob> {
        self.0.values()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

// ============================================================================
// Per-kind payloads
// ============================================================================

/// One timestamped occurrence of a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelInstance {
    pub timestamp_ms: u64,
    pub confidence: f64,
}

/// Aggregated detection of a single label (confidence on a 0-100 scale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelDetection {
    pub confidence: f64,
    #[serde(default)]
    pub instances: Vec<LabelInstance>,
}

/// Label name -> detection.
pub type LabelResults = BTreeMap<String, LabelDetection>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// A face seen at one point of the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FaceDetection {
    pub timestamp_ms: u64,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
    /// Provider specific attributes (emotions, age range, ...)
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModerationLabel {
    pub timestamp_ms: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    /// `pronunciation` or `punctuation`
    #[serde(rename = "type")]
    pub item_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub items: Vec<TranscriptItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl Transcript {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            items: Vec::new(),
            language_code: None,
        }
    }
}

/// Result payload of a succeeded job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum JobPayload {
    Labels(LabelResults),
    Faces(Vec<FaceDetection>),
    Moderation(Vec<ModerationLabel>),
    Transcript(Transcript),
}

impl JobPayload {
    /// The job kind that produces this payload.
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Labels(_) => JobKind::LabelDetection,
            JobPayload::Faces(_) => JobKind::FaceDetection,
            JobPayload::Moderation(_) => JobKind::ContentModeration,
            JobPayload::Transcript(_) => JobKind::Transcription,
        }
    }
}

/// Observed state of an external job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    /// Still running
    Pending,
    /// Finished with a payload
    Succeeded(JobPayload),
    /// Definitive failure reported by the provider
    Failed { reason: String },
}

// ============================================================================
// Text insights
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SentimentScores {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
    pub mixed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SentimentAnalysis {
    /// POSITIVE, NEGATIVE, NEUTRAL or MIXED
    pub sentiment: String,
    pub scores: SentimentScores,
}

/// Named entity found in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub score: f64,
}

/// Text analysis of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextInsights {
    pub sentiment: SentimentAnalysis,
    pub key_phrases: Vec<String>,
    pub entities: Vec<Entity>,
}

// ============================================================================
// Staged results
// ============================================================================

/// Transcript together with the text analysis run on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StagedTranscript {
    pub transcript: Transcript,
    pub insights: TextInsights,
}

/// A payload ready to be held for the merge.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedPayload {
    Labels(LabelResults),
    Faces(Vec<FaceDetection>),
    Moderation(Vec<ModerationLabel>),
    Transcription(StagedTranscript),
}

impl StagedPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            StagedPayload::Labels(_) => JobKind::LabelDetection,
            StagedPayload::Faces(_) => JobKind::FaceDetection,
            StagedPayload::Moderation(_) => JobKind::ContentModeration,
            StagedPayload::Transcription(_) => JobKind::Transcription,
        }
    }
}

/// Results retrieved so far for one video.
///
/// A kind is settled once it either holds a payload or is listed in
/// `failed` (tolerated failure).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StagedResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faces: Option<Vec<FaceDetection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<Vec<ModerationLabel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<StagedTranscript>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub failed: BTreeSet<JobKind>,
}

impl StagedResults {
    pub fn insert(&mut self, payload: StagedPayload) {
        self.failed.remove(&payload.kind());
        match payload {
            StagedPayload::Labels(labels) => self.labels = Some(labels),
            StagedPayload::Faces(faces) => self.faces = Some(faces),
            StagedPayload::Moderation(labels) => self.moderation = Some(labels),
            StagedPayload::Transcription(t) => self.transcription = Some(t),
        }
    }

    /// Record a tolerated failure for a kind.
    pub fn mark_failed(&mut self, kind: JobKind) {
        self.failed.insert(kind);
    }

    pub fn has_payload(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::LabelDetection => self.labels.is_some(),
            JobKind::FaceDetection => self.faces.is_some(),
            JobKind::ContentModeration => self.moderation.is_some(),
            JobKind::Transcription => self.transcription.is_some(),
        }
    }

    pub fn is_settled(&self, kind: JobKind) -> bool {
        self.has_payload(kind) || self.failed.contains(&kind)
    }

    /// Number of kinds settled so far.
    pub fn settled_count(&self) -> usize {
        JobKind::ALL.iter().filter(|k| self.is_settled(**k)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.settled_count() == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_criticality() {
        assert!(JobKind::Transcription.is_critical());
        assert!(!JobKind::FaceDetection.is_critical());
        assert!(!JobKind::LabelDetection.is_critical());
        assert!(!JobKind::ContentModeration.is_critical());
    }

    #[test]
    fn test_media_ref_extension() {
        assert_eq!(
            MediaRef::from("s3://bucket/videos/u1/clip.MOV").extension().as_deref(),
            Some("mov")
        );
        assert_eq!(MediaRef::from("s3://bucket/videos/noext").extension(), None);
        assert_eq!(MediaRef::from("s3://bucket.v2/videos/noext").extension(), None);
    }

    #[test]
    fn test_pending_jobs_map_roundtrip() {
        let mut pending = PendingJobs::default();
        pending.insert(AnalysisJob::new(JobKind::LabelDetection, JobHandle::from("lbl-1")));
        pending.insert(AnalysisJob::new(JobKind::Transcription, JobHandle::from("tr-1")));

        let json = serde_json::to_value(&pending).unwrap();
        assert!(json.get("label_detection").is_some());
        assert!(json.get("transcription").is_some());

        let back: PendingJobs = serde_json::from_value(json).unwrap();
        assert_eq!(back, pending);
        assert_eq!(
            back.kinds(),
            vec![JobKind::LabelDetection, JobKind::Transcription]
        );
    }

    #[test]
    fn test_staged_results_settlement() {
        let mut staged = StagedResults::default();
        assert!(staged.is_empty());

        staged.mark_failed(JobKind::FaceDetection);
        staged.insert(StagedPayload::Labels(LabelResults::new()));

        assert!(staged.is_settled(JobKind::FaceDetection));
        assert!(!staged.has_payload(JobKind::FaceDetection));
        assert!(staged.has_payload(JobKind::LabelDetection));
        assert!(!staged.is_settled(JobKind::Transcription));
        assert_eq!(staged.settled_count(), 2);
    }
}
