//! Tests for the GyroEngine wiring

use gyro_api::SourceKind;
use gyro_storage_file::{FileStore, FileStoreConfig};
use gyro_storage_memory::MemoryStore;

use super::*;
use crate::test_utils::{payload, record};

fn engine(store: Arc<MemoryStore>) -> (GyroEngine, CancellationToken) {
    engine_on(store)
}

fn engine_on(store: Arc<dyn TelemetryStore>) -> (GyroEngine, CancellationToken) {
    let token = CancellationToken::new();
    let engine = GyroEngine::start(store, EngineConfig::new("secret"), token.clone());
    (engine, token)
}

#[tokio::test]
async fn test_ingest_persists_through_shutdown() {
    let store = Arc::new(MemoryStore::default());
    let (engine, token) = engine(store.clone());

    engine.router().ingest(&payload("abc"), SourceKind::Http).unwrap();
    engine.router().ingest(&payload("abc"), SourceKind::Http).unwrap();
    token.cancel();
    engine.shutdown(Duration::from_secs(1)).await;

    assert_eq!(store.find_all().await.unwrap().len(), 2);
    assert_eq!(engine.metrics().snapshot().persisted, 2);
}

#[tokio::test]
async fn test_restore_warms_cache_and_sequence() {
    let store = Arc::new(MemoryStore::default());
    for (device, seq) in [("abc", 3), ("xyz", 9), ("abc", 5)] {
        store.append(&record(device, seq)).await.unwrap();
    }
    let (engine, _token) = engine(store);

    assert_eq!(engine.restore().await.unwrap(), 2);

    assert_eq!(engine.cache().get("abc").unwrap().sequence, 5);
    assert_eq!(engine.cache().get("xyz").unwrap().sequence, 9);
    let next = engine.router().ingest(&payload("abc"), SourceKind::Bus).unwrap();
    assert_eq!(next.sequence, 10);
}

#[tokio::test]
async fn test_restore_survives_torn_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileStoreConfig { dir: dir.path().to_path_buf() };
    let seeded = FileStore::open(&config).await.unwrap();
    seeded.append(&record("abc", 4)).await.unwrap();
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(seeded.records_path())
        .unwrap();
    std::io::Write::write_all(&mut file, br#"{"device_id":"abc","gy"#).unwrap();

    let store = Arc::new(FileStore::open(&config).await.unwrap());
    let (engine, _token) = engine_on(store);

    assert_eq!(engine.restore().await.unwrap(), 1);
    assert_eq!(engine.router().next_sequence(), 5);
}

#[tokio::test]
async fn test_clean_uses_configured_secret() {
    let store = Arc::new(MemoryStore::default());
    let (engine, _token) = engine(store.clone());
    engine.router().ingest(&payload("abc"), SourceKind::Http).unwrap();

    assert!(engine.admin().clean("nope", "nope").await.is_err());
    assert!(engine.cache().get("abc").is_some());
}

#[tokio::test]
async fn test_clean_on_live_engine_leaves_store_empty() {
    let store = Arc::new(MemoryStore::default());
    let (engine, _token) = engine(store.clone());
    engine.router().ingest(&payload("abc"), SourceKind::Http).unwrap();
    engine.router().ingest(&payload("abc"), SourceKind::Http).unwrap();

    assert_eq!(engine.admin().clean("secret", "secret").await.unwrap(), 2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.find_all().await.unwrap().is_empty());
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_clean_after_shutdown_still_wipes() {
    let store = Arc::new(MemoryStore::default());
    let (engine, token) = engine(store.clone());
    engine.router().ingest(&payload("abc"), SourceKind::Http).unwrap();

    token.cancel();
    engine.shutdown(Duration::from_secs(1)).await;

    assert_eq!(engine.admin().clean("secret", "secret").await.unwrap(), 1);
    assert!(store.find_all().await.unwrap().is_empty());
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (engine, _token) = engine(Arc::new(MemoryStore::default()));

    engine.shutdown(Duration::from_millis(50)).await;
    engine.shutdown(Duration::from_millis(50)).await;

    assert!(engine.connections().is_shutting_down());
}
