//! Tests for the administrative wipe

use gyro_storage_memory::MemoryStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::PersistConfig;
use crate::metrics::IngestMetrics;
use crate::test_utils::record;

struct Seeded {
    admin: Admin,
    store: Arc<MemoryStore>,
    cache: Arc<LatestValueCache>,
    writer: PersistWriter,
    token: CancellationToken,
    worker: JoinHandle<()>,
}

async fn seeded(secret: &str) -> Seeded {
    let store = Arc::new(MemoryStore::default());
    let cache = Arc::new(LatestValueCache::new());
    for seq in 1..=3 {
        let r = record("abc", seq);
        store.append(&r).await.unwrap();
        cache.update(r);
    }
    let token = CancellationToken::new();
    let (writer, worker) = PersistWriter::spawn(
        store.clone(),
        PersistConfig::default(),
        Arc::new(IngestMetrics::new()),
        token.clone(),
    );
    let admin = Admin::new(
        secret,
        store.clone(),
        Arc::clone(&cache),
        writer.clone(),
        Duration::from_secs(1),
    );
    Seeded { admin, store, cache, writer, token, worker }
}

#[tokio::test]
async fn test_wrong_secret_leaves_data() {
    let Seeded { admin, store, cache, .. } = seeded("b").await;

    let err = admin.clean("a", "a").await.unwrap_err();

    assert!(matches!(err, CleanError::Auth(AuthError::InvalidPassword)));
    assert_eq!(store.find_all().await.unwrap().len(), 3);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_mismatched_confirmation_leaves_data() {
    let Seeded { admin, store, .. } = seeded("s").await;

    let err = admin.clean("s", "t").await.unwrap_err();

    assert!(matches!(err, CleanError::Auth(AuthError::Mismatch)));
    assert_eq!(store.find_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_mismatch_checked_before_secret() {
    let Seeded { admin, .. } = seeded("s").await;

    let err = admin.clean("x", "y").await.unwrap_err();

    assert!(matches!(err, CleanError::Auth(AuthError::Mismatch)));
}

#[tokio::test]
async fn test_correct_secret_wipes_everything() {
    let Seeded { admin, store, cache, .. } = seeded("s").await;

    let deleted = admin.clean("s", "s").await.unwrap();

    assert_eq!(deleted, 3);
    assert!(store.find_all().await.unwrap().is_empty());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_wipe_keeps_device_registry() {
    let Seeded { admin, store, .. } = seeded("s").await;
    store.register_device("abc").await.unwrap();

    admin.clean("s", "s").await.unwrap();

    assert_eq!(store.list_devices().await.unwrap(), vec!["abc".to_string()]);
}

#[tokio::test]
async fn test_second_wipe_deletes_nothing() {
    let Seeded { admin, .. } = seeded("s").await;

    admin.clean("s", "s").await.unwrap();

    assert_eq!(admin.clean("s", "s").await.unwrap(), 0);
}

#[tokio::test]
async fn test_wipe_covers_records_still_queued() {
    let Seeded { admin, store, writer, .. } = seeded("s").await;
    for seq in 4..=6 {
        assert!(writer.submit(record("abc", seq)));
    }

    let deleted = admin.clean("s", "s").await.unwrap();

    assert_eq!(deleted, 6);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_records_after_wipe_are_kept() {
    let Seeded { admin, store, writer, token, worker, .. } = seeded("s").await;

    admin.clean("s", "s").await.unwrap();
    assert!(writer.submit(record("abc", 7)));
    token.cancel();
    worker.await.unwrap();

    let stored: Vec<u64> = store.find_all().await.unwrap().iter().map(|r| r.sequence).collect();
    assert_eq!(stored, vec![7]);
}

#[tokio::test]
async fn test_wipe_after_worker_stopped_hits_store() {
    let Seeded { admin, store, token, worker, .. } = seeded("s").await;
    token.cancel();
    worker.await.unwrap();

    assert_eq!(admin.clean("s", "s").await.unwrap(), 3);
    assert!(store.find_all().await.unwrap().is_empty());
}
