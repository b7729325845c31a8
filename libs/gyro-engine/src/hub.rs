//! Subscription hub
//!
//! Registry of live connections per device and push-based fan-out.
//!
//! ```text
//! IngestRouter ──publish(device, record)──▶ SubscriptionHub
//!                                             │  read lock: snapshot queues
//!                                             │  (lock released)
//!                                             ▼
//!                              SendQueue  SendQueue  SendQueue
//!                                 │          │          │
//!                              delivery   delivery   delivery
//! ```
//!
//! Registry mutations are short write-locked sections. Fan-out copies the
//! subscriber queues out under a read lock and enqueues after releasing
//! it, so a slow connection can neither stall ingestion nor block other
//! connections from (un)subscribing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use gyro_api::TelemetryRecord;

use crate::connection::ConnectionId;
use crate::error::HubError;
use crate::metrics::IngestMetrics;
use crate::queue::{PushOutcome, SendQueue};

#[derive(Debug, Default)]
struct Registry {
    /// Every attached connection, subscribed or not
    queues: HashMap<ConnectionId, Arc<SendQueue>>,
    by_device: HashMap<String, HashSet<ConnectionId>>,
    by_conn: HashMap<ConnectionId, String>,
}

impl Registry {
    fn remove_subscription(&mut self, conn: ConnectionId) -> Option<String> {
        let device = self.by_conn.remove(&conn)?;
        if let Some(conns) = self.by_device.get_mut(&device) {
            conns.remove(&conn);
            if conns.is_empty() {
                self.by_device.remove(&device);
            }
        }
        Some(device)
    }
}

#[derive(Debug)]
pub struct SubscriptionHub {
    registry: RwLock<Registry>,
    metrics: Arc<IngestMetrics>,
}

impl SubscriptionHub {
    pub fn new(metrics: Arc<IngestMetrics>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            metrics,
        }
    }

    /// Register a connection's queue. The connection starts unsubscribed.
    pub fn attach(&self, conn: ConnectionId, queue: Arc<SendQueue>) {
        self.registry.write().queues.insert(conn, queue);
    }

    /// Forget a connection entirely. Idempotent.
    pub fn detach(&self, conn: ConnectionId) -> Option<Arc<SendQueue>> {
        let mut reg = self.registry.write();
        reg.remove_subscription(conn);
        let queue = reg.queues.remove(&conn)?;
        queue.retarget(None);
        Some(queue)
    }

    /// Subscribe `conn` to `device`, atomically replacing any prior
    /// subscription. Returns the previously subscribed device.
    pub fn subscribe(&self, conn: ConnectionId, device: &str) -> Result<Option<String>, HubError> {
        let mut reg = self.registry.write();
        let queue = reg
            .queues
            .get(&conn)
            .cloned()
            .ok_or(HubError::UnknownConnection(conn))?;

        let previous = reg.remove_subscription(conn);
        reg.by_device
            .entry(device.to_string())
            .or_default()
            .insert(conn);
        reg.by_conn.insert(conn, device.to_string());

        // Retarget under the registry lock so the queue never accepts a
        // record for a device the registry no longer maps it to.
        let discarded = queue.retarget(Some(device));
        drop(reg);

        tracing::debug!(
            conn,
            device,
            previous = ?previous,
            discarded,
            "subscribed"
        );
        Ok(previous)
    }

    /// Remove `conn`'s subscription. Idempotent; returns the device it was
    /// subscribed to, if any.
    pub fn unsubscribe(&self, conn: ConnectionId) -> Option<String> {
        let mut reg = self.registry.write();
        let device = reg.remove_subscription(conn)?;
        if let Some(queue) = reg.queues.get(&conn) {
            queue.retarget(None);
        }
        Some(device)
    }

    /// Enqueue `record` on every connection subscribed to `device` right
    /// now. Never blocks on subscribers; returns the number of queues that
    /// accepted the record.
    pub fn publish(&self, device: &str, record: &Arc<TelemetryRecord>) -> usize {
        // Retargets happen under the registry write lock, so the
        // generations read here match the subscriptions in the snapshot.
        let targets: Vec<(Arc<SendQueue>, u64)> = {
            let reg = self.registry.read();
            match reg.by_device.get(device) {
                Some(conns) => conns
                    .iter()
                    .filter_map(|id| reg.queues.get(id))
                    .map(|q| (Arc::clone(q), q.generation()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0u64;
        let mut evicted = 0u64;
        for (queue, generation) in targets {
            match queue.push_at(Arc::clone(record), generation) {
                PushOutcome::Queued => delivered += 1,
                PushOutcome::Evicted => {
                    delivered += 1;
                    evicted += 1;
                }
                PushOutcome::Rejected => {}
            }
        }

        if evicted > 0 {
            tracing::debug!(device, evicted, "subscriber queues full, evicted oldest");
        }
        self.metrics.record_published(delivered, evicted);
        delivered as usize
    }

    pub fn subscription_of(&self, conn: ConnectionId) -> Option<String> {
        self.registry.read().by_conn.get(&conn).cloned()
    }

    pub fn subscriber_count(&self, device: &str) -> usize {
        self.registry
            .read()
            .by_device
            .get(device)
            .map_or(0, HashSet::len)
    }

    /// Attached connections, subscribed or not
    pub fn connection_count(&self) -> usize {
        self.registry.read().queues.len()
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
