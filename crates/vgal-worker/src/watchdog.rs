//! Background sweep for videos stuck in `processing`.
//!
//! Re-checks are bounded, so a video only outlives the processing timeout
//! when its re-check chain was lost. The watchdog force-fails such videos
//! and tells their owners; in-flight external jobs are abandoned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vgal_models::{Notification, VideoEvent, VideoId, WATCHDOG_TIMEOUT_MESSAGE};
use vgal_queue::NotificationSink;
use vgal_store::{StoreError, VideoStore};

use crate::metrics;
use crate::retry::FailureTracker;

/// Videos handled per sweep.
const SWEEP_BATCH: usize = 100;

pub struct StaleVideoWatchdog {
    store: Arc<dyn VideoStore>,
    notifier: Arc<dyn NotificationSink>,
    interval: Duration,
    timeout: Duration,
}

impl StaleVideoWatchdog {
    pub fn new(
        store: Arc<dyn VideoStore>,
        notifier: Arc<dyn NotificationSink>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            interval,
            timeout,
        }
    }

    /// Sweep every `interval` until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting stale video watchdog (interval: {:?}, timeout: {:?})",
            self.interval, self.timeout
        );

        let mut ticker = tokio::time::interval(self.interval);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Stale video watchdog stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(_) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Stale video sweep error: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run a single sweep. Returns `(stale, recovered)`.
    pub async fn check_once(&self) -> anyhow::Result<(u32, u32)> {
        let timeout = chrono::Duration::from_std(self.timeout)?;
        let cutoff = Utc::now() - timeout;

        let stale = self.store.stale_processing(cutoff, SWEEP_BATCH).await?;
        if stale.is_empty() {
            return Ok((0, 0));
        }

        let mut recovered = 0u32;
        for video_id in &stale {
            match self.recover(video_id).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(e) => error!(video_id = %video_id, "Failed to fail stale video: {}", e),
            }
        }

        info!(
            "Stale video sweep complete: {} stale, {} failed",
            stale.len(),
            recovered
        );
        Ok((stale.len() as u32, recovered))
    }

    /// Force-fail one video. `Ok(false)` if it finished in the meantime.
    async fn recover(&self, video_id: &VideoId) -> anyhow::Result<bool> {
        let record = match self
            .store
            .update(video_id, &mut |rec| {
                rec.apply(VideoEvent::WatchdogTimeout)?;
                Ok(())
            })
            .await
        {
            Ok(rec) => rec,
            Err(StoreError::Transition(_)) | Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        warn!(
            video_id = %video_id,
            started_at = ?record.processing_started_at,
            "Failed video stuck in processing"
        );
        metrics::record_video_failed("watchdog");

        let notification = Notification::failed(video_id.clone(), WATCHDOG_TIMEOUT_MESSAGE);
        if let Err(e) = self.notifier.publish(&record.user_id, &notification).await {
            warn!(video_id = %video_id, "Failed to publish notification: {}", e);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use vgal_models::{MediaRef, VideoRecord, VideoStatus};
    use vgal_queue::QueueResult;
    use vgal_store::InMemoryVideoStore;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Notification>>);

    #[async_trait]
    impl NotificationSink for Collect {
        async fn publish(&self, _user_id: &str, n: &Notification) -> QueueResult<()> {
            self.0.lock().await.push(n.clone());
            Ok(())
        }
    }

    async fn processing(store: &InMemoryVideoStore, id: &str, hours_ago: i64) -> VideoId {
        let mut rec = VideoRecord::new(
            VideoId::from(id),
            "user-1",
            id,
            MediaRef::from("s3://videos/clip.mp4"),
        );
        rec.apply(VideoEvent::UploadConfirmed).unwrap();
        rec.apply_at(
            VideoEvent::ProcessingStarted,
            Utc::now() - chrono::Duration::hours(hours_ago),
        )
        .unwrap();
        store.create(&rec).await.unwrap();
        rec.video_id
    }

    fn watchdog(store: Arc<InMemoryVideoStore>, sink: Arc<Collect>) -> StaleVideoWatchdog {
        StaleVideoWatchdog::new(
            store,
            sink,
            Duration::from_secs(300),
            Duration::from_secs(2 * 60 * 60),
        )
    }

    #[tokio::test]
    async fn test_fails_only_stale_videos() {
        let store = Arc::new(InMemoryVideoStore::new());
        let sink = Arc::new(Collect::default());
        let stuck = processing(&store, "stuck", 3).await;
        let fresh = processing(&store, "fresh", 1).await;

        let (stale, recovered) = watchdog(store.clone(), sink.clone()).check_once().await.unwrap();
        assert_eq!((stale, recovered), (1, 1));

        let rec = store.get_required(&stuck).await.unwrap();
        assert_eq!(rec.status, VideoStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some(WATCHDOG_TIMEOUT_MESSAGE));
        assert_eq!(
            store.get_required(&fresh).await.unwrap().status,
            VideoStatus::Processing
        );

        let sent = sink.0.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_name(), Notification::FAILED);
    }

    #[tokio::test]
    async fn test_second_sweep_finds_nothing() {
        let store = Arc::new(InMemoryVideoStore::new());
        let sink = Arc::new(Collect::default());
        processing(&store, "stuck", 5).await;

        let dog = watchdog(store, sink.clone());
        assert_eq!(dog.check_once().await.unwrap(), (1, 1));
        assert_eq!(dog.check_once().await.unwrap(), (0, 0));
        assert_eq!(sink.0.lock().await.len(), 1);
    }
}
