//! Ingest router
//!
//! Single entry point for every producer. Parses and validates a payload,
//! stamps it with the next sequence and the receive time, then hands the
//! record to the cache, the persistence worker and the hub, in that order.
//!
//! ```text
//! bus ─┐
//! http ├─▶ ingest ─▶ LatestValueCache::update
//! ws  ─┘             PersistWriter::submit      (never waits)
//!                    SubscriptionHub::publish
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;

use gyro_api::{Reading, SourceKind, TelemetryRecord, TelemetryStore};

use crate::cache::{CacheUpdate, LatestValueCache};
use crate::error::IngestError;
use crate::hub::SubscriptionHub;
use crate::metrics::IngestMetrics;
use crate::persist::PersistWriter;

pub struct IngestRouter {
    /// Next sequence to hand out; shared by all producers
    next_sequence: AtomicU64,
    cache: Arc<LatestValueCache>,
    hub: Arc<SubscriptionHub>,
    writer: PersistWriter,
    store: Arc<dyn TelemetryStore>,
    metrics: Arc<IngestMetrics>,
    /// Deadline for background device registration
    store_timeout: Duration,
}

impl IngestRouter {
    pub fn new(
        cache: Arc<LatestValueCache>,
        hub: Arc<SubscriptionHub>,
        writer: PersistWriter,
        store: Arc<dyn TelemetryStore>,
        metrics: Arc<IngestMetrics>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            next_sequence: AtomicU64::new(1),
            cache,
            hub,
            writer,
            store,
            metrics,
            store_timeout,
        }
    }

    /// Parse, stamp and route one raw payload.
    ///
    /// Malformed payloads are logged, counted and returned as errors; the
    /// caller decides whether to tell the producer. They are never retried.
    pub fn ingest(&self, raw: &[u8], source: SourceKind) -> Result<Arc<TelemetryRecord>, IngestError> {
        self.metrics.record_received();
        let reading = match parse(raw) {
            Ok(r) => r,
            Err(e) => {
                self.metrics.record_parse_error();
                tracing::warn!(source = %source, bytes = raw.len(), error = %e, "dropping malformed payload");
                return Err(e);
            }
        };

        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        let record = Arc::new(TelemetryRecord::from_reading(reading, sequence, Utc::now()));

        let update = self.cache.update(Arc::clone(&record));
        self.writer.submit(Arc::clone(&record));
        let delivered = self.hub.publish(&record.device_id, &record);

        tracing::trace!(
            source = %source,
            device = %record.device_id,
            sequence,
            ?update,
            delivered,
            "record routed"
        );

        if update == CacheUpdate::Inserted {
            self.register_device(&record.device_id);
        }
        Ok(record)
    }

    /// Make sure future sequences are greater than `last`. Used after
    /// restoring state from the store.
    pub fn resume_after(&self, last: u64) {
        self.next_sequence.fetch_max(last.saturating_add(1), Ordering::AcqRel);
    }

    /// Sequence the next record will get
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Acquire)
    }

    fn register_device(&self, device: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(device, "no runtime, device not registered");
            return;
        };
        let store = Arc::clone(&self.store);
        let device = device.to_string();
        let deadline = self.store_timeout;
        runtime.spawn(async move {
            match tokio::time::timeout(deadline, store.register_device(&device)).await {
                Ok(Ok(())) => tracing::info!(device = %device, "device registered"),
                Ok(Err(e)) => tracing::warn!(device = %device, error = %e, "device registration failed"),
                Err(_) => tracing::warn!(device = %device, "device registration timed out"),
            }
        });
    }
}

fn parse(raw: &[u8]) -> Result<Reading, IngestError> {
    let reading: Reading = serde_json::from_slice(raw)?;
    Ok(reading.validate()?)
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
