//! Connection lifecycle
//!
//! Admission, ids, one delivery task per subscriber connection, and
//! teardown. Teardown is idempotent and runs from whichever path notices
//! first: the reader (client closed), the writer (transport write failed),
//! shutdown, or the last handle being dropped.
//!
//! ```text
//! admit_subscriber ──▶ Connection ──attach──▶ SubscriptionHub
//!                          │
//!                          └── spawn_delivery ──▶ SendQueue ▶ RecordSink
//!
//! admit_uploader ──CAS(slot 0 → id)──▶ Connection | ConflictError
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;

use gyro_api::TelemetryRecord;

use crate::error::{ConflictError, DeliveryError, HubError};
use crate::hub::SubscriptionHub;
use crate::metrics::IngestMetrics;
use crate::queue::SendQueue;

/// Process-unique connection id. Never 0.
pub type ConnectionId = u64;

/// Sentinel stored in the upload slot when nobody holds it
const SLOT_FREE: ConnectionId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Subscribe-socket: receives one device's stream
    Subscriber,
    /// Upload-socket: holds the ingest-exclusive slot
    Uploader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Active,
    /// Shutting down; flushing what is already buffered
    Draining,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Active,
            1 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// Transport half that writes records to a client, in order.
pub trait RecordSink: Send {
    fn send<'a>(&'a mut self, record: &'a TelemetryRecord)
        -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>;
}

#[derive(Debug)]
struct Shared {
    hub: Arc<SubscriptionHub>,
    metrics: Arc<IngestMetrics>,
    upload_slot: AtomicU64,
    active: AtomicUsize,
}

// ═══════════════════════════════════════════════════════════════
//  Connection
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    kind: ConnectionKind,
    /// Subscriber connections only
    queue: Option<Arc<SendQueue>>,
    state: AtomicU8,
    token: CancellationToken,
    shared: Arc<Shared>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn queue(&self) -> Option<&Arc<SendQueue>> {
        self.queue.as_ref()
    }

    /// Records this connection lost to queue overflow
    pub fn dropped(&self) -> u64 {
        self.queue.as_ref().map_or(0, |q| q.dropped())
    }

    /// Subscribe to `device`, replacing any prior subscription.
    pub fn subscribe(&self, device: &str) -> Result<Option<String>, HubError> {
        self.shared.hub.subscribe(self.id, device)
    }

    /// Resolves once the connection is closed or the manager shuts down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    fn mark_draining(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Active as u8,
            ConnectionState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Unregister and release the connection. Only the first call does
    /// anything; returns whether this call performed the teardown.
    pub fn close(&self) -> bool {
        let prev = self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(prev) == ConnectionState::Closed {
            return false;
        }

        match self.kind {
            ConnectionKind::Subscriber => {
                self.shared.hub.detach(self.id);
                if let Some(queue) = &self.queue {
                    queue.close();
                }
            }
            ConnectionKind::Uploader => {
                let _ = self.shared.upload_slot.compare_exchange(
                    self.id,
                    SLOT_FREE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }
        self.token.cancel();

        self.shared.active.fetch_sub(1, Ordering::AcqRel);
        self.shared.metrics.record_connection_closed();
        tracing::info!(
            conn = self.id,
            kind = ?self.kind,
            dropped = self.dropped(),
            "connection closed"
        );
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// ═══════════════════════════════════════════════════════════════
//  ConnectionManager
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    queue_capacity: usize,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionManager {
    pub fn new(
        hub: Arc<SubscriptionHub>,
        metrics: Arc<IngestMetrics>,
        queue_capacity: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                hub,
                metrics,
                upload_slot: AtomicU64::new(SLOT_FREE),
                active: AtomicUsize::new(0),
            }),
            next_id: AtomicU64::new(1),
            queue_capacity,
            token,
            tracker: TaskTracker::new(),
        }
    }

    fn open(&self, id: ConnectionId, kind: ConnectionKind, queue: Option<Arc<SendQueue>>) -> Arc<Connection> {
        self.shared.active.fetch_add(1, Ordering::AcqRel);
        self.shared.metrics.record_connection_opened();
        tracing::info!(conn = id, kind = ?kind, "connection admitted");
        Arc::new(Connection {
            id,
            kind,
            queue,
            state: AtomicU8::new(ConnectionState::Active as u8),
            token: self.token.child_token(),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Admit a subscribe-socket connection. It starts unsubscribed.
    pub fn admit_subscriber(&self) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SendQueue::new(self.queue_capacity));
        self.shared.hub.attach(id, Arc::clone(&queue));
        self.open(id, ConnectionKind::Subscriber, Some(queue))
    }

    /// Admit an upload-socket connection if the exclusive slot is free.
    /// A held slot is left untouched and the newcomer gets Conflict.
    pub fn admit_uploader(&self) -> Result<Arc<Connection>, ConflictError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.shared.upload_slot.compare_exchange(
            SLOT_FREE,
            id,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(self.open(id, ConnectionKind::Uploader, None)),
            Err(holder) => {
                self.shared.metrics.record_upload_conflict();
                tracing::warn!(holder, "upload slot busy, rejecting connection");
                Err(ConflictError { holder })
            }
        }
    }

    /// Start the delivery task of a subscriber connection: drain its queue
    /// into `sink` in order until the connection closes, a write fails,
    /// or the manager shuts down (in which case what is already buffered
    /// is flushed first). Returns `None` for connections without a queue.
    ///
    /// The task only holds a weak handle, so dropping the last
    /// `Arc<Connection>` still tears the connection down.
    pub fn spawn_delivery<S>(&self, conn: &Arc<Connection>, mut sink: S) -> Option<JoinHandle<()>>
    where
        S: RecordSink + 'static,
    {
        let queue = Arc::clone(conn.queue.as_ref()?);
        let weak = Arc::downgrade(conn);
        let token = conn.token.clone();
        let shutdown = self.token.clone();
        let id = conn.id;

        Some(self.tracker.spawn(async move {
            let mut failed = false;
            loop {
                let record = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    record = queue.recv() => record,
                };
                let Some(record) = record else { break };
                if let Err(e) = sink.send(&record).await {
                    tracing::debug!(conn = id, error = %e, "write failed, closing connection");
                    failed = true;
                    break;
                }
            }

            let closed_by_peer = weak
                .upgrade()
                .is_none_or(|c| c.state() == ConnectionState::Closed);
            if !failed && shutdown.is_cancelled() && !closed_by_peer {
                if let Some(conn) = weak.upgrade() {
                    conn.mark_draining();
                }
                queue.close();
                let mut flushed = 0usize;
                while let Some(record) = queue.try_pop() {
                    if sink.send(&record).await.is_err() {
                        break;
                    }
                    flushed += 1;
                }
                tracing::debug!(conn = id, flushed, "drained on shutdown");
            }

            if let Some(conn) = weak.upgrade() {
                conn.close();
            }
        }))
    }

    /// Cancel every connection and wait up to `grace` for delivery tasks
    /// to drain. Returns false if the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    grace_ms = grace.as_millis() as u64,
                    "delivery tasks still running after grace period"
                );
                false
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn upload_slot_holder(&self) -> Option<ConnectionId> {
        match self.shared.upload_slot.load(Ordering::Acquire) {
            SLOT_FREE => None,
            id => Some(id),
        }
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
