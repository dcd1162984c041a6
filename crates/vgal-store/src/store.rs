//! Video record store contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vgal_models::{VideoId, VideoRecord};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_conflict;

/// Attempts made by [`VideoStore::update`] before giving up on a contended record.
pub const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Read-modify-write callback. It may run more than once when a concurrent
/// writer wins the race, so it must only depend on the record it is given.
pub type Mutator<'a> = dyn FnMut(&mut VideoRecord) -> StoreResult<()> + Send + 'a;

/// Persistent store of video records.
///
/// Implementations only provide the primitives; `update` layers the
/// transactional read-modify-write on top of `compare_and_swap`.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, record: &VideoRecord) -> StoreResult<()>;

    async fn get(&self, video_id: &VideoId) -> StoreResult<Option<VideoRecord>>;

    /// Replace the record if its stored revision still equals `expected_revision`.
    ///
    /// Returns the stored record with its revision bumped.
    async fn compare_and_swap(
        &self,
        record: &VideoRecord,
        expected_revision: u64,
    ) -> StoreResult<VideoRecord>;

    /// Ids of records in `processing` that started before `started_before`.
    async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<VideoId>>;

    /// Fetch a record, failing with `NotFound` if it is missing.
    async fn get_required(&self, video_id: &VideoId) -> StoreResult<VideoRecord> {
        self.get(video_id)
            .await?
            .ok_or_else(|| StoreError::not_found(video_id.as_str()))
    }

    /// Transactional read-modify-write.
    ///
    /// An error returned by the mutator aborts the update and leaves the
    /// stored record untouched.
    async fn update(
        &self,
        video_id: &VideoId,
        mutate: &mut Mutator<'_>,
    ) -> StoreResult<VideoRecord> {
        let mut last_error = None;

        for attempt in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.get_required(video_id).await?;
            let expected = current.revision;

            let mut next = current;
            mutate(&mut next)?;
            next.updated_at = Utc::now();

            match self.compare_and_swap(&next, expected).await {
                Ok(stored) => return Ok(stored),
                Err(e) if e.is_conflict() => {
                    debug!(
                        video_id = %video_id,
                        attempt = attempt + 1,
                        "Video update lost a revision race, retrying"
                    );
                    record_conflict("update");
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            video_id = %video_id,
            "Video update failed after {} attempts: {:?}",
            MAX_UPDATE_ATTEMPTS,
            last_error
        );
        Err(last_error.unwrap_or_else(|| StoreError::Conflict(video_id.to_string())))
    }
}
