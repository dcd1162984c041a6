//! Analysis service request/response types.

use serde::{Deserialize, Serialize};

use vgal_models::{
    Entity, FaceDetection, JobKind, JobPayload, LabelResults, MediaRef, ModerationLabel,
    SentimentAnalysis, Transcript,
};

use crate::error::{AnalysisError, AnalysisResult};

/// Minimum label confidence requested from label detection.
pub const LABEL_MIN_CONFIDENCE: f64 = 70.0;
/// Minimum confidence requested from content moderation.
pub const MODERATION_MIN_CONFIDENCE: f64 = 60.0;
/// Transcription language.
pub const TRANSCRIBE_LANGUAGE_CODE: &str = "en-US";
/// Text analysis language.
pub const TEXT_LANGUAGE_CODE: &str = "en";
/// Speaker diarization limit for transcription.
pub const MAX_SPEAKER_LABELS: u32 = 10;

const DEFAULT_MEDIA_FORMAT: &str = "mp4";

/// Speaker diarization settings for transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub show_speaker_labels: bool,
    pub max_speaker_labels: u32,
}

/// Request body for starting a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    /// Storage URI of the media
    pub media_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_attributes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<TranscriptionSettings>,
}

impl SubmitJobRequest {
    /// Build the request for a job kind with its fixed provider parameters.
    pub fn for_kind(kind: JobKind, media: &MediaRef, job_name: &str) -> Self {
        let mut request = Self {
            media_uri: media.as_str().to_string(),
            job_name: None,
            min_confidence: None,
            face_attributes: None,
            language_code: None,
            media_format: None,
            settings: None,
        };

        match kind {
            JobKind::LabelDetection => {
                request.min_confidence = Some(LABEL_MIN_CONFIDENCE);
            }
            JobKind::FaceDetection => {
                request.face_attributes = Some("ALL".to_string());
            }
            JobKind::ContentModeration => {
                request.min_confidence = Some(MODERATION_MIN_CONFIDENCE);
            }
            JobKind::Transcription => {
                request.job_name = Some(job_name.to_string());
                request.language_code = Some(TRANSCRIBE_LANGUAGE_CODE.to_string());
                request.media_format =
                    Some(media.extension().unwrap_or_else(|| DEFAULT_MEDIA_FORMAT.to_string()));
                request.settings = Some(TranscriptionSettings {
                    show_speaker_labels: true,
                    max_speaker_labels: MAX_SPEAKER_LABELS,
                });
            }
        }

        request
    }
}

/// Response to a job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

/// Job state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteJobStatus {
    #[serde(alias = "QUEUED", alias = "SUBMITTED")]
    InProgress,
    #[serde(alias = "COMPLETED")]
    Succeeded,
    Failed,
}

/// Response to a status poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: RemoteJobStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Decode the `result` of a succeeded job into its typed payload.
pub fn decode_payload(kind: JobKind, result: serde_json::Value) -> AnalysisResult<JobPayload> {
    let payload = match kind {
        JobKind::LabelDetection => {
            #[derive(Deserialize)]
            struct Body {
                labels: LabelResults,
            }
            JobPayload::Labels(serde_json::from_value::<Body>(result)?.labels)
        }
        JobKind::FaceDetection => {
            #[derive(Deserialize)]
            struct Body {
                faces: Vec<FaceDetection>,
            }
            JobPayload::Faces(serde_json::from_value::<Body>(result)?.faces)
        }
        JobKind::ContentModeration => {
            #[derive(Deserialize)]
            struct Body {
                moderation_labels: Vec<ModerationLabel>,
            }
            JobPayload::Moderation(serde_json::from_value::<Body>(result)?.moderation_labels)
        }
        JobKind::Transcription => {
            JobPayload::Transcript(serde_json::from_value::<Transcript>(result)?)
        }
    };

    Ok(payload)
}

/// Ensure a succeeded job actually carries a result.
pub fn require_result(
    kind: JobKind,
    result: Option<serde_json::Value>,
) -> AnalysisResult<serde_json::Value> {
    result.ok_or_else(|| {
        AnalysisError::invalid_response(format!("{} job succeeded without a result", kind))
    })
}

/// Request body for text analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    pub text: String,
    pub language_code: String,
}

impl TextRequest {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            language_code: TEXT_LANGUAGE_CODE.to_string(),
        }
    }
}

pub type SentimentResponse = SentimentAnalysis;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPhrasesResponse {
    pub key_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesResponse {
    pub entities: Vec<Entity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transcription_request_parameters() {
        let media = MediaRef::from("s3://bucket/videos/u1/talk.mov");
        let req = SubmitJobRequest::for_kind(JobKind::Transcription, &media, "transcribe-v1-1");

        assert_eq!(req.job_name.as_deref(), Some("transcribe-v1-1"));
        assert_eq!(req.language_code.as_deref(), Some("en-US"));
        assert_eq!(req.media_format.as_deref(), Some("mov"));
        assert_eq!(req.settings.as_ref().map(|s| s.max_speaker_labels), Some(10));
        assert!(req.min_confidence.is_none());
    }

    #[test]
    fn test_detection_request_parameters() {
        let media = MediaRef::from("s3://bucket/v1.mp4");
        let labels = SubmitJobRequest::for_kind(JobKind::LabelDetection, &media, "ignored");
        assert_eq!(labels.min_confidence, Some(70.0));
        assert!(labels.job_name.is_none());

        let moderation = SubmitJobRequest::for_kind(JobKind::ContentModeration, &media, "");
        assert_eq!(moderation.min_confidence, Some(60.0));

        let faces = SubmitJobRequest::for_kind(JobKind::FaceDetection, &media, "");
        assert_eq!(faces.face_attributes.as_deref(), Some("ALL"));

        let json = serde_json::to_value(&faces).unwrap();
        assert!(json.get("min_confidence").is_none());
    }

    #[test]
    fn test_remote_status_aliases() {
        let s: RemoteJobStatus = serde_json::from_value(json!("COMPLETED")).unwrap();
        assert_eq!(s, RemoteJobStatus::Succeeded);
        let s: RemoteJobStatus = serde_json::from_value(json!("QUEUED")).unwrap();
        assert_eq!(s, RemoteJobStatus::InProgress);
    }

    #[test]
    fn test_decode_label_payload() {
        let result = json!({
            "labels": {
                "Dog": {"confidence": 97.5, "instances": [{"timestamp_ms": 1000, "confidence": 97.5}]},
                "Grass": {"confidence": 75.0}
            }
        });

        let payload = decode_payload(JobKind::LabelDetection, result).unwrap();
        assert_eq!(payload.kind(), JobKind::LabelDetection);
        match payload {
            JobPayload::Labels(labels) => {
                assert_eq!(labels.len(), 2);
                assert_eq!(labels["Dog"].instances.len(), 1);
                assert!(labels["Grass"].instances.is_empty());
            }
            other => panic!("Expected labels, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_mismatched_payload_fails() {
        let err = decode_payload(JobKind::FaceDetection, json!({"labels": {}})).unwrap_err();
        assert!(matches!(err, AnalysisError::Json(_)));
    }
}
