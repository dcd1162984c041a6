//! In-process video store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use vgal_models::{VideoId, VideoRecord, VideoStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::VideoStore;

/// Video store backed by a map behind an async lock.
#[derive(Default)]
pub struct InMemoryVideoStore {
    records: RwLock<HashMap<VideoId, VideoRecord>>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn create(&self, record: &VideoRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.video_id) {
            return Err(StoreError::AlreadyExists(record.video_id.to_string()));
        }
        records.insert(record.video_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, video_id: &VideoId) -> StoreResult<Option<VideoRecord>> {
        Ok(self.records.read().await.get(video_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        record: &VideoRecord,
        expected_revision: u64,
    ) -> StoreResult<VideoRecord> {
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(&record.video_id)
            .ok_or_else(|| StoreError::not_found(record.video_id.as_str()))?;

        if slot.revision != expected_revision {
            return Err(StoreError::Conflict(format!(
                "{} is at revision {}, expected {}",
                record.video_id, slot.revision, expected_revision
            )));
        }

        let mut stored = record.clone();
        stored.revision = expected_revision + 1;
        *slot = stored.clone();
        Ok(stored)
    }

    async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<VideoId>> {
        let records = self.records.read().await;
        let mut stale: Vec<(DateTime<Utc>, VideoId)> = records
            .values()
            .filter(|r| r.status == VideoStatus::Processing)
            .filter_map(|r| r.processing_started_at.map(|at| (at, r.video_id.clone())))
            .filter(|(at, _)| *at < started_before)
            .collect();

        stale.sort();
        Ok(stale.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
    use vgal_models::{MediaRef, VideoEvent};

    fn uploaded(id: &str) -> VideoRecord {
        let mut rec = VideoRecord::new(
            VideoId::from(id),
            "user-1",
            "Holiday",
            MediaRef::from("s3://bucket/holiday.mp4"),
        );
        rec.status = VideoStatus::Uploaded;
        rec
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryVideoStore::new();
        store.create(&uploaded("v1")).await.unwrap();

        let rec = store.get(&VideoId::from("v1")).await.unwrap().unwrap();
        assert_eq!(rec.status, VideoStatus::Uploaded);
        assert!(store.get(&VideoId::from("missing")).await.unwrap().is_none());

        let err = store.create(&uploaded("v1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_applies_mutator_and_bumps_revision() {
        let store = InMemoryVideoStore::new();
        store.create(&uploaded("v1")).await.unwrap();

        let rec = store
            .update(&VideoId::from("v1"), &mut |rec| {
                rec.apply(VideoEvent::ProcessingStarted)?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(rec.status, VideoStatus::Processing);
        assert_eq!(rec.revision, 1);
        assert_eq!(store.get_required(&VideoId::from("v1")).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = InMemoryVideoStore::new();
        let err = store
            .update(&VideoId::from("ghost"), &mut |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_record_untouched() {
        let store = InMemoryVideoStore::new();
        store.create(&uploaded("v1")).await.unwrap();

        let err = store
            .update(&VideoId::from("v1"), &mut |rec| {
                rec.tags.push("half-written".into());
                rec.apply(VideoEvent::AnalysisCompleted)?;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Transition(_)));
        let rec = store.get_required(&VideoId::from("v1")).await.unwrap();
        assert!(rec.tags.is_empty());
        assert_eq!(rec.revision, 0);
    }

    #[tokio::test]
    async fn test_stale_cas_is_a_conflict() {
        let store = InMemoryVideoStore::new();
        let rec = uploaded("v1");
        store.create(&rec).await.unwrap();

        store.compare_and_swap(&rec, 0).await.unwrap();
        let err = store.compare_and_swap(&rec, 0).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let store = Arc::new(InMemoryVideoStore::new());
        store.create(&uploaded("v1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(&VideoId::from("v1"), &mut |rec| {
                        rec.tags.push(format!("tag-{}", i));
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rec = store.get_required(&VideoId::from("v1")).await.unwrap();
        assert_eq!(rec.tags.len(), 4);
        assert_eq!(rec.revision, 4);
    }

    #[tokio::test]
    async fn test_stale_processing_query() {
        let store = InMemoryVideoStore::new();
        let now = Utc::now();

        let mut old = uploaded("old");
        old.apply_at(VideoEvent::ProcessingStarted, now - Duration::hours(3))
            .unwrap();
        let mut fresh = uploaded("fresh");
        fresh
            .apply_at(VideoEvent::ProcessingStarted, now - Duration::minutes(5))
            .unwrap();
        let mut done = uploaded("done");
        done.apply_at(VideoEvent::ProcessingStarted, now - Duration::hours(4))
            .unwrap();
        done.apply(VideoEvent::AnalysisCompleted).unwrap();

        for rec in [&old, &fresh, &done] {
            store.create(rec).await.unwrap();
        }

        let stale = store
            .stale_processing(now - Duration::hours(2), 100)
            .await
            .unwrap();
        assert_eq!(stale, vec![VideoId::from("old")]);
    }
}
