//! Telemetry ingest and fan-out engine.
//!
//! ```text
//! producers ─▶ IngestRouter ─┬─▶ LatestValueCache
//!                            ├─▶ PersistWriter ─▶ TelemetryStore
//!                            └─▶ SubscriptionHub ─▶ SendQueue ─▶ delivery task
//! ```
//!
//! [`GyroEngine`] wires the pieces together around one store handle and
//! owns the background work: the persistence worker and the delivery
//! tasks tracked by the [`ConnectionManager`].

pub mod admin;
pub mod bus;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod persist;
pub mod queue;
pub mod router;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gyro_api::{StoreError, TelemetryStore};

pub use admin::Admin;
pub use bus::attach_bus;
pub use cache::{CacheUpdate, LatestValueCache};
pub use config::{EngineConfig, PersistConfig};
pub use connection::{
    Connection, ConnectionId, ConnectionKind, ConnectionManager, ConnectionState, RecordSink,
};
pub use error::{AuthError, CleanError, ConflictError, DeliveryError, HubError, IngestError};
pub use hub::SubscriptionHub;
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use persist::{PersistWriter, with_retry};
pub use queue::{PushOutcome, SendQueue};
pub use router::IngestRouter;

// ═══════════════════════════════════════════════════════════════
//  GyroEngine
// ═══════════════════════════════════════════════════════════════

pub struct GyroEngine {
    router: Arc<IngestRouter>,
    cache: Arc<LatestValueCache>,
    hub: Arc<SubscriptionHub>,
    connections: Arc<ConnectionManager>,
    admin: Arc<Admin>,
    metrics: Arc<IngestMetrics>,
    store: Arc<dyn TelemetryStore>,
    persist_config: PersistConfig,
    /// Separate from `shutdown`: the worker keeps storing until the
    /// connections have drained.
    persist_token: CancellationToken,
    persist_task: Mutex<Option<JoinHandle<()>>>,
}

impl GyroEngine {
    /// Build the engine and start the persistence worker. Must be called
    /// from within a tokio runtime.
    ///
    /// Cancelling `shutdown` closes every connection; call
    /// [`shutdown`](Self::shutdown) to drain.
    pub fn start(store: Arc<dyn TelemetryStore>, config: EngineConfig, shutdown: CancellationToken) -> Self {
        let metrics = Arc::new(IngestMetrics::new());
        let cache = Arc::new(LatestValueCache::with_stripes(config.cache_stripes));
        let hub = Arc::new(SubscriptionHub::new(Arc::clone(&metrics)));
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&hub),
            Arc::clone(&metrics),
            config.subscriber_buffer,
            shutdown,
        ));

        let persist_config = config.persist.clone();
        let store_timeout = persist_config.timeout;
        let persist_token = CancellationToken::new();
        let (writer, persist_task) = PersistWriter::spawn(
            Arc::clone(&store),
            config.persist,
            Arc::clone(&metrics),
            persist_token.clone(),
        );

        let router = Arc::new(IngestRouter::new(
            Arc::clone(&cache),
            Arc::clone(&hub),
            writer.clone(),
            Arc::clone(&store),
            Arc::clone(&metrics),
            store_timeout,
        ));
        let admin = Arc::new(Admin::new(
            config.secret,
            Arc::clone(&store),
            Arc::clone(&cache),
            writer,
            // The record in flight ahead of the wipe, then the wipe itself
            persist_config.call_budget().saturating_mul(2),
        ));

        tracing::info!(
            subscriber_buffer = config.subscriber_buffer,
            cache_stripes = config.cache_stripes,
            "engine started"
        );

        Self {
            router,
            cache,
            hub,
            connections,
            admin,
            metrics,
            store,
            persist_config,
            persist_token,
            persist_task: Mutex::new(Some(persist_task)),
        }
    }

    /// Warm the cache from persisted records and continue the sequence
    /// after the highest one found. Returns how many devices were loaded.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let records = self.store.find_all().await?;
        let mut last = 0u64;
        for record in records {
            last = last.max(record.sequence);
            self.cache.update(Arc::new(record));
        }
        if last > 0 {
            self.router.resume_after(last);
        }
        let devices = self.cache.len();
        tracing::info!(devices, last_sequence = last, "state restored from store");
        Ok(devices)
    }

    pub fn router(&self) -> &Arc<IngestRouter> {
        &self.router
    }

    pub fn cache(&self) -> &Arc<LatestValueCache> {
        &self.cache
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn admin(&self) -> &Arc<Admin> {
        &self.admin
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.store
    }

    /// Timeout and retry policy of store calls
    pub fn persist_config(&self) -> &PersistConfig {
        &self.persist_config
    }

    /// Drain connections for up to `grace`, then stop the persistence
    /// worker once it has stored what is still queued. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        if !self.connections.shutdown(grace).await {
            tracing::warn!("connections did not drain in time");
        }

        self.persist_token.cancel();
        let task = self.persist_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "persist worker panicked");
            }
        }
        tracing::info!(metrics = ?self.metrics.snapshot(), "engine stopped");
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
