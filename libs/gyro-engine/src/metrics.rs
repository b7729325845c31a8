//! Engine counters
//!
//! Relaxed atomics, eventually consistent. Failures on the ingest path
//! (bad payloads, persistence giving up) surface here instead of
//! propagating to producers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Payloads handed to the router
    received: AtomicU64,
    /// Payloads dropped as unparsable or invalid
    parse_errors: AtomicU64,
    /// Records published to the hub
    published: AtomicU64,
    /// Records pushed into subscriber queues
    deliveries: AtomicU64,
    /// Oldest-record evictions across all subscriber queues
    queue_evictions: AtomicU64,
    /// Records appended to the store
    persisted: AtomicU64,
    /// Append attempts repeated after a transient failure
    persist_retries: AtomicU64,
    /// Records the store never accepted
    persist_failures: AtomicU64,
    /// Records dropped because the persistence queue was full
    persist_dropped: AtomicU64,
    /// Upload-socket admissions rejected with Conflict
    upload_conflicts: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
}

/// Point-in-time copy of [`IngestMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub parse_errors: u64,
    pub published: u64,
    pub deliveries: u64,
    pub queue_evictions: u64,
    pub persisted: u64,
    pub persist_retries: u64,
    pub persist_failures: u64,
    pub persist_dropped: u64,
    pub upload_conflicts: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self, deliveries: u64, evictions: u64) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(deliveries, Ordering::Relaxed);
        self.queue_evictions.fetch_add(evictions, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_retry(&self) {
        self.persist_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persist_dropped(&self) {
        self.persist_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_upload_conflict(&self) {
        self.upload_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            queue_evictions: self.queue_evictions.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_retries: self.persist_retries.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            persist_dropped: self.persist_dropped.load(Ordering::Relaxed),
            upload_conflicts: self.upload_conflicts.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
        }
    }
}
