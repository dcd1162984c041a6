//! Redis video store integration tests.

use chrono::{Duration, Utc};

use vgal_models::{MediaRef, VideoEvent, VideoId, VideoRecord, VideoStatus};
use vgal_store::{RedisStoreConfig, RedisVideoStore, StoreError, VideoStore};

fn test_store() -> RedisVideoStore {
    dotenvy::dotenv().ok();

    let mut config = RedisStoreConfig::from_env();
    config.key_prefix = format!("vgal-test-{}", uuid::Uuid::new_v4());
    RedisVideoStore::new(config).expect("Failed to create store")
}

fn uploaded(id: &str) -> VideoRecord {
    let mut rec = VideoRecord::new(
        VideoId::from(id),
        "test_user",
        "Integration",
        MediaRef::from("s3://bucket/integration.mp4"),
    );
    rec.status = VideoStatus::Uploaded;
    rec
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_create_get_update() {
    let store = test_store();
    let id = VideoId::from("v1");

    store.create(&uploaded("v1")).await.expect("Failed to create");
    let err = store.create(&uploaded("v1")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    let rec = store
        .update(&id, &mut |rec| {
            rec.apply(VideoEvent::ProcessingStarted)?;
            rec.advance_progress(10);
            Ok(())
        })
        .await
        .expect("Failed to update");
    assert_eq!(rec.status, VideoStatus::Processing);
    assert_eq!(rec.revision, 1);

    let loaded = store.get_required(&id).await.expect("Failed to get");
    assert_eq!(loaded.progress, 10);
    assert_eq!(loaded.revision, 1);

    store.delete(&id).await.expect("Failed to delete");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cas_conflict() {
    let store = test_store();
    let rec = uploaded("v2");
    store.create(&rec).await.expect("Failed to create");

    store.compare_and_swap(&rec, 0).await.expect("First swap");
    let err = store.compare_and_swap(&rec, 0).await.unwrap_err();
    assert!(err.is_conflict());

    store.delete(&rec.video_id).await.expect("Failed to delete");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_processing_index() {
    let store = test_store();
    let id = VideoId::from("v3");
    store.create(&uploaded("v3")).await.expect("Failed to create");

    store
        .update(&id, &mut |rec| {
            rec.apply_at(VideoEvent::ProcessingStarted, Utc::now() - Duration::hours(3))?;
            Ok(())
        })
        .await
        .expect("Failed to start");

    let stale = store
        .stale_processing(Utc::now() - Duration::hours(2), 10)
        .await
        .expect("Failed to query");
    assert_eq!(stale, vec![id.clone()]);

    store
        .update(&id, &mut |rec| {
            rec.apply(VideoEvent::WatchdogTimeout)?;
            Ok(())
        })
        .await
        .expect("Failed to fail");

    let stale = store
        .stale_processing(Utc::now(), 10)
        .await
        .expect("Failed to query");
    assert!(stale.is_empty());

    store.delete(&id).await.expect("Failed to delete");
}
