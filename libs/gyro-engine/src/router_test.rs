//! Tests for IngestRouter

use gyro_storage_memory::MemoryStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::PersistConfig;
use crate::error::IngestError;
use crate::queue::SendQueue;
use crate::test_utils::payload;

struct Fixture {
    router: IngestRouter,
    cache: Arc<LatestValueCache>,
    hub: Arc<SubscriptionHub>,
    store: Arc<MemoryStore>,
    metrics: Arc<IngestMetrics>,
    token: CancellationToken,
    worker: JoinHandle<()>,
}

impl Fixture {
    fn new() -> Self {
        let metrics = Arc::new(IngestMetrics::new());
        let cache = Arc::new(LatestValueCache::new());
        let hub = Arc::new(SubscriptionHub::new(Arc::clone(&metrics)));
        let store = Arc::new(MemoryStore::default());
        let token = CancellationToken::new();
        let (writer, worker) = PersistWriter::spawn(
            store.clone(),
            PersistConfig::default(),
            Arc::clone(&metrics),
            token.clone(),
        );
        let router = IngestRouter::new(
            Arc::clone(&cache),
            Arc::clone(&hub),
            writer,
            store.clone(),
            Arc::clone(&metrics),
            Duration::from_secs(1),
        );
        Self { router, cache, hub, store, metrics, token, worker }
    }

    /// Stop the persistence worker after it has drained.
    async fn drain(self) -> Arc<MemoryStore> {
        self.token.cancel();
        self.worker.await.unwrap();
        self.store
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[tokio::test]
async fn test_valid_payload_is_stamped() {
    let fx = Fixture::new();

    let first = fx.router.ingest(&payload("abc"), SourceKind::Http).unwrap();
    let second = fx.router.ingest(&payload("abc"), SourceKind::Bus).unwrap();

    assert_eq!(first.device_id, "abc");
    assert_eq!(first.sequence, 1);
    assert_eq!(second.sequence, 2);
    assert!(second.received_at >= first.received_at);
    assert_eq!(fx.router.next_sequence(), 3);
}

#[tokio::test]
async fn test_producer_sequence_is_ignored() {
    let fx = Fixture::new();
    let raw = br#"{"device_id":"abc","sequence":900,"gyro":{"x":0,"y":0,"z":0}}"#;

    let record = fx.router.ingest(raw, SourceKind::UploadSocket).unwrap();

    assert_eq!(record.sequence, 1);
}

#[tokio::test]
async fn test_malformed_json_is_dropped() {
    let fx = Fixture::new();

    let err = fx.router.ingest(b"{not json", SourceKind::Bus).unwrap_err();

    assert!(matches!(err, IngestError::Json(_)));
    assert!(fx.cache.is_empty());
    assert_eq!(fx.router.next_sequence(), 1);
    let snap = fx.metrics.snapshot();
    assert_eq!(snap.received, 1);
    assert_eq!(snap.parse_errors, 1);
    assert_eq!(snap.published, 0);
}

#[tokio::test]
async fn test_blank_device_is_dropped() {
    let fx = Fixture::new();
    let raw = br#"{"deviceaddress":"  ","gyro":{"x":0,"y":0,"z":0}}"#;

    let err = fx.router.ingest(raw, SourceKind::Http).unwrap_err();

    assert!(matches!(err, IngestError::Invalid(_)));
    assert_eq!(fx.metrics.snapshot().parse_errors, 1);
}

#[tokio::test]
async fn test_missing_gyro_is_dropped() {
    let fx = Fixture::new();

    let err = fx.router.ingest(br#"{"deviceaddress":"abc"}"#, SourceKind::Http).unwrap_err();

    assert!(matches!(err, IngestError::Json(_)));
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_cache_holds_latest() {
    let fx = Fixture::new();

    fx.router.ingest(&payload("abc"), SourceKind::Http).unwrap();
    let last = fx.router.ingest(&payload("abc"), SourceKind::Http).unwrap();

    assert_eq!(fx.cache.get("abc").unwrap().sequence, last.sequence);
    assert!(fx.cache.get("xyz").is_none());
}

#[tokio::test]
async fn test_publish_reaches_only_matching_subscriber() {
    let fx = Fixture::new();
    let queue = Arc::new(SendQueue::new(8));
    fx.hub.attach(1, Arc::clone(&queue));
    fx.hub.subscribe(1, "abc").unwrap();

    fx.router.ingest(&payload("xyz"), SourceKind::Bus).unwrap();
    let abc = fx.router.ingest(&payload("abc"), SourceKind::Bus).unwrap();

    assert_eq!(queue.len(), 1);
    assert_eq!(queue.try_pop().unwrap().sequence, abc.sequence);
}

#[tokio::test]
async fn test_records_are_persisted() {
    let fx = Fixture::new();
    for _ in 0..3 {
        fx.router.ingest(&payload("abc"), SourceKind::Http).unwrap();
    }

    let store = fx.drain().await;

    let stored: Vec<u64> = store.find_all().await.unwrap().iter().map(|r| r.sequence).collect();
    assert_eq!(stored, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_new_device_is_registered() {
    let fx = Fixture::new();
    fx.router.ingest(&payload("abc"), SourceKind::Http).unwrap();
    fx.router.ingest(&payload("abc"), SourceKind::Http).unwrap();

    let mut devices = Vec::new();
    for _ in 0..100 {
        devices = fx.store.list_devices().await.unwrap();
        if !devices.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(devices, vec!["abc".to_string()]);
}

#[tokio::test]
async fn test_resume_after_only_moves_forward() {
    let fx = Fixture::new();

    fx.router.resume_after(41);
    fx.router.resume_after(7);

    let record = fx.router.ingest(&payload("abc"), SourceKind::Http).unwrap();
    assert_eq!(record.sequence, 42);
}
