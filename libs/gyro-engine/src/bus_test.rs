//! Tests for bus attachment

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use gyro_storage_memory::MemoryStore;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::cache::LatestValueCache;
use crate::config::PersistConfig;
use crate::hub::SubscriptionHub;
use crate::metrics::IngestMetrics;
use crate::persist::PersistWriter;
use crate::test_utils::payload;

/// In-process bus: `deliver` invokes whatever handler is subscribed.
#[derive(Default)]
struct LoopbackBus {
    handlers: Mutex<HashMap<String, (Qos, BusHandler)>>,
    refuse: Option<String>,
}

impl LoopbackBus {
    fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let handler = self.handlers.lock().get(topic).map(|(_, h)| Arc::clone(h));
        match handler {
            Some(h) => {
                h(payload);
                true
            }
            None => false,
        }
    }
}

impl MessageBus for LoopbackBus {
    fn subscribe(&self, topic: &str, qos: Qos, handler: BusHandler)
        -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>
    {
        let topic = topic.to_string();
        Box::pin(async move {
            if self.refuse.as_deref() == Some(topic.as_str()) {
                return Err(BusError::Subscribe { topic, detail: "not authorized".into() });
            }
            self.handlers.lock().insert(topic, (qos, handler));
            Ok(())
        })
    }
}

fn router() -> (Arc<IngestRouter>, Arc<LatestValueCache>, Arc<IngestMetrics>) {
    let metrics = Arc::new(IngestMetrics::new());
    let cache = Arc::new(LatestValueCache::new());
    let hub = Arc::new(SubscriptionHub::new(Arc::clone(&metrics)));
    let store = Arc::new(MemoryStore::default());
    let (writer, _worker) = PersistWriter::spawn(
        store.clone(),
        PersistConfig::default(),
        Arc::clone(&metrics),
        CancellationToken::new(),
    );
    let router = IngestRouter::new(
        Arc::clone(&cache),
        hub,
        writer,
        store,
        Arc::clone(&metrics),
        Duration::from_secs(1),
    );
    (Arc::new(router), cache, metrics)
}

fn topics() -> Vec<String> {
    vec!["sample".to_string(), "sub_data".to_string()]
}

#[tokio::test]
async fn test_every_topic_is_subscribed() {
    let bus = LoopbackBus::default();
    let (router, _cache, _metrics) = router();

    attach_bus(&bus, &topics(), Qos::AtLeastOnce, router).await.unwrap();

    let handlers = bus.handlers.lock();
    assert_eq!(handlers.len(), 2);
    assert!(handlers.values().all(|(qos, _)| *qos == Qos::AtLeastOnce));
}

#[tokio::test]
async fn test_bus_messages_are_ingested() {
    let bus = LoopbackBus::default();
    let (router, cache, _metrics) = router();
    attach_bus(&bus, &topics(), Qos::AtLeastOnce, router).await.unwrap();

    assert!(bus.deliver("sample", &payload("abc")));
    assert!(bus.deliver("sub_data", &payload("xyz")));

    assert_eq!(cache.get("abc").unwrap().sequence, 1);
    assert_eq!(cache.get("xyz").unwrap().sequence, 2);
}

#[tokio::test]
async fn test_malformed_bus_message_is_counted() {
    let bus = LoopbackBus::default();
    let (router, cache, metrics) = router();
    attach_bus(&bus, &topics(), Qos::AtLeastOnce, router).await.unwrap();

    bus.deliver("sample", b"garbage");

    assert!(cache.is_empty());
    assert_eq!(metrics.snapshot().parse_errors, 1);
}

#[tokio::test]
async fn test_subscribe_failure_is_returned() {
    let bus = LoopbackBus {
        refuse: Some("sub_data".to_string()),
        ..Default::default()
    };
    let (router, _cache, _metrics) = router();

    let err = attach_bus(&bus, &topics(), Qos::AtMostOnce, router).await.unwrap_err();

    assert!(matches!(err, BusError::Subscribe { ref topic, .. } if topic == "sub_data"));
}
