//! Result merger.
//!
//! Turns staged payloads into the searchable fields of a video record. Pure:
//! no persistence, no scheduling.

use std::collections::HashSet;

use vgal_models::{
    Entity, FaceDetection, JobKind, LabelResults, ModerationLabel, PendingJobs,
    SentimentAnalysis, StagedResults, VideoRecord,
};

/// Labels above this confidence (0-100) become tags.
pub const TAG_MIN_CONFIDENCE: f64 = 80.0;

/// Maximum number of tags kept on a record.
pub const MAX_TAGS: usize = 20;

/// Characters of transcript sent to text analysis.
pub const MAX_TEXT_CHARS: usize = 5000;

/// Entity types that become categories.
pub const CATEGORY_ENTITY_TYPES: [&str; 3] = ["PERSON", "LOCATION", "ORGANIZATION"];

/// Fields written to the record on completion.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedAnalysis {
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub transcript: Option<String>,
    pub detected_objects: Option<LabelResults>,
    pub detected_faces: Option<Vec<FaceDetection>>,
    pub moderation_labels: Option<Vec<ModerationLabel>>,
    pub sentiment_analysis: Option<SentimentAnalysis>,
    pub key_phrases: Option<Vec<String>>,
    pub entities: Option<Vec<Entity>>,
}

impl MergedAnalysis {
    pub fn apply_to(self, record: &mut VideoRecord) {
        record.tags = self.tags;
        record.categories = self.categories;
        record.transcript = self.transcript;
        record.detected_objects = self.detected_objects;
        record.detected_faces = self.detected_faces;
        record.moderation_labels = self.moderation_labels;
        record.sentiment_analysis = self.sentiment_analysis;
        record.key_phrases = self.key_phrases;
        record.entities = self.entities;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeVerdict {
    /// Jobs still in flight.
    NotReady(Vec<JobKind>),
    Ready(MergedAnalysis),
}

/// Merge the staged results once nothing is pending.
pub fn merge_if_ready(
    pending: &PendingJobs,
    staged: &StagedResults,
    existing_tags: &[String],
    existing_categories: &[String],
) -> MergeVerdict {
    if !pending.is_empty() {
        return MergeVerdict::NotReady(pending.kinds());
    }
    MergeVerdict::Ready(merge(staged, existing_tags, existing_categories))
}

/// Merge whatever subset of results is staged.
pub fn merge(
    staged: &StagedResults,
    existing_tags: &[String],
    existing_categories: &[String],
) -> MergedAnalysis {
    let insights = staged.transcription.as_ref().map(|t| &t.insights);
    let entities = insights.map(|i| i.entities.as_slice()).unwrap_or_default();

    MergedAnalysis {
        tags: merge_tags(existing_tags, staged.labels.as_ref()),
        categories: merge_categories(existing_categories, entities),
        transcript: staged
            .transcription
            .as_ref()
            .map(|t| t.transcript.text.clone()),
        detected_objects: staged.labels.clone(),
        detected_faces: staged.faces.clone(),
        moderation_labels: staged.moderation.clone(),
        sentiment_analysis: insights.map(|i| i.sentiment.clone()),
        key_phrases: insights.map(|i| i.key_phrases.clone()),
        entities: insights.map(|i| i.entities.clone()),
    }
}

/// Existing tags first, then confident labels in name order, deduplicated
/// and capped at `MAX_TAGS`.
pub fn merge_tags(existing: &[String], labels: Option<&LabelResults>) -> Vec<String> {
    let detected = labels
        .into_iter()
        .flat_map(|labels| labels.iter())
        .filter(|(_, detection)| detection.confidence > TAG_MIN_CONFIDENCE)
        .map(|(name, _)| name.to_lowercase());

    let mut seen = HashSet::new();
    existing
        .iter()
        .cloned()
        .chain(detected)
        .filter(|tag| seen.insert(tag.clone()))
        .take(MAX_TAGS)
        .collect()
}

pub fn merge_categories(existing: &[String], entities: &[Entity]) -> Vec<String> {
    let detected = entities
        .iter()
        .filter(|e| CATEGORY_ENTITY_TYPES.contains(&e.entity_type.as_str()))
        .map(|e| e.entity_type.to_lowercase());

    let mut seen = HashSet::new();
    existing
        .iter()
        .cloned()
        .chain(detected)
        .filter(|category| seen.insert(category.clone()))
        .collect()
}

/// First `MAX_TEXT_CHARS` characters of `text`.
pub fn text_for_analysis(text: &str) -> &str {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgal_models::{
        AnalysisJob, JobHandle, LabelDetection, MediaRef, SentimentScores, StagedPayload,
        StagedTranscript, TextInsights, Transcript, VideoId,
    };

    fn labels(entries: &[(&str, f64)]) -> LabelResults {
        entries
            .iter()
            .map(|(name, confidence)| {
                (
                    name.to_string(),
                    LabelDetection {
                        confidence: *confidence,
                        instances: Vec::new(),
                    },
                )
            })
            .collect()
    }

    fn entity(text: &str, entity_type: &str) -> Entity {
        Entity {
            text: text.to_string(),
            entity_type: entity_type.to_string(),
            score: 0.99,
        }
    }

    fn transcription(text: &str, entities: Vec<Entity>) -> StagedPayload {
        StagedPayload::Transcription(StagedTranscript {
            transcript: Transcript::from_text(text),
            insights: TextInsights {
                sentiment: SentimentAnalysis {
                    sentiment: "POSITIVE".to_string(),
                    scores: SentimentScores {
                        positive: 0.9,
                        ..Default::default()
                    },
                },
                key_phrases: vec!["hello world".to_string()],
                entities,
            },
        })
    }

    #[test]
    fn test_confident_labels_become_lowercase_tags() {
        let tags = merge_tags(
            &["holiday".to_string()],
            Some(&labels(&[("Beach", 92.0), ("Dog", 80.0), ("Sea", 80.5)])),
        );
        assert_eq!(tags, vec!["holiday", "beach", "sea"]);
    }

    #[test]
    fn test_tags_are_deduplicated() {
        let tags = merge_tags(
            &["beach".to_string(), "beach".to_string()],
            Some(&labels(&[("Beach", 95.0), ("BEACH", 90.0)])),
        );
        assert_eq!(tags, vec!["beach"]);
    }

    #[test]
    fn test_twenty_five_labels_yield_twenty_tags() {
        let entries: Vec<(String, f64)> = (0..25)
            .map(|i| (format!("Label{:02}", i), 85.0 + (i % 15) as f64))
            .collect();
        let refs: Vec<(&str, f64)> = entries.iter().map(|(n, c)| (n.as_str(), *c)).collect();

        let tags = merge_tags(&[], Some(&labels(&refs)));

        assert_eq!(tags.len(), MAX_TAGS);
        assert_eq!(tags[0], "label00");
        assert_eq!(tags[19], "label19");
    }

    #[test]
    fn test_existing_tags_survive_truncation() {
        let existing: Vec<String> = (0..5).map(|i| format!("user{}", i)).collect();
        let entries: Vec<(String, f64)> = (0..30).map(|i| (format!("L{:02}", i), 99.0)).collect();
        let refs: Vec<(&str, f64)> = entries.iter().map(|(n, c)| (n.as_str(), *c)).collect();

        let tags = merge_tags(&existing, Some(&labels(&refs)));

        assert_eq!(tags.len(), MAX_TAGS);
        assert_eq!(&tags[..5], existing.as_slice());
    }

    #[test]
    fn test_categories_from_entity_types() {
        let categories = merge_categories(
            &[],
            &[
                entity("Alice", "PERSON"),
                entity("Bob", "PERSON"),
                entity("Paris", "LOCATION"),
                entity("Acme", "ORGANIZATION"),
                entity("Tuesday", "DATE"),
            ],
        );
        assert_eq!(categories, vec!["person", "location", "organization"]);
    }

    #[test]
    fn test_not_ready_while_jobs_pending() {
        let mut pending = PendingJobs::default();
        pending.insert(AnalysisJob::new(JobKind::Transcription, JobHandle::from("tr-1")));

        let verdict = merge_if_ready(&pending, &StagedResults::default(), &[], &[]);
        assert_eq!(verdict, MergeVerdict::NotReady(vec![JobKind::Transcription]));
    }

    #[test]
    fn test_merge_passes_text_insights_through() {
        let mut staged = StagedResults::default();
        staged.insert(StagedPayload::Labels(labels(&[("Beach", 90.0)])));
        staged.insert(transcription("hello world", vec![entity("Paris", "LOCATION")]));
        staged.mark_failed(JobKind::FaceDetection);

        let merged = match merge_if_ready(&PendingJobs::default(), &staged, &[], &[]) {
            MergeVerdict::Ready(m) => m,
            other => panic!("expected ready, got {:?}", other),
        };

        assert_eq!(merged.transcript.as_deref(), Some("hello world"));
        assert_eq!(merged.tags, vec!["beach"]);
        assert_eq!(merged.categories, vec!["location"]);
        assert!(merged.detected_faces.is_none());
        assert_eq!(
            merged.sentiment_analysis.map(|s| s.sentiment).as_deref(),
            Some("POSITIVE")
        );
        assert_eq!(merged.key_phrases, Some(vec!["hello world".to_string()]));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut staged = StagedResults::default();
        staged.insert(StagedPayload::Labels(labels(&[("Beach", 90.0), ("Sun", 88.0)])));
        staged.insert(transcription("hi", vec![entity("Alice", "PERSON")]));

        let mut record = VideoRecord::new(
            VideoId::from("v1"),
            "user-1",
            "Holiday",
            MediaRef::from("s3://videos/v1.mp4"),
        )
        .with_tags(["summer"]);

        merge(&staged, &record.tags, &record.categories).apply_to(&mut record);
        let first = record.clone();
        merge(&staged, &record.tags, &record.categories).apply_to(&mut record);

        assert_eq!(record, first);
        assert_eq!(record.tags, vec!["summer", "beach", "sun"]);
    }

    #[test]
    fn test_text_truncation_respects_char_boundaries() {
        let short = "hello world";
        assert_eq!(text_for_analysis(short), short);

        let long = "é".repeat(MAX_TEXT_CHARS + 10);
        let truncated = text_for_analysis(&long);
        assert_eq!(truncated.chars().count(), MAX_TEXT_CHARS);
        assert_eq!(truncated.len(), MAX_TEXT_CHARS * 2);
    }
}
