//! Bounded per-connection send queue
//!
//! A fixed-capacity ring of records waiting to be written to one
//! connection. Producers never wait: when the ring is full the oldest
//! record is evicted and the connection's dropped counter increments.
//!
//! The queue also remembers which device its connection is subscribed
//! to, and a generation that every retarget bumps. Fan-out pushes with
//! the generation it saw in its registry snapshot; a queue retargeted in
//! between (even back to the same device) rejects the record, so a
//! subscription never receives a record published before it began.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use gyro_api::TelemetryRecord;

/// Default per-connection capacity
pub const DEFAULT_CAPACITY: usize = 64;

/// Result of [`SendQueue::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest buffered record
    Evicted,
    /// Closed, or subscribed to a different device
    Rejected,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Arc<TelemetryRecord>>,
    device: Option<String>,
    generation: u64,
    closed: bool,
}

#[derive(Debug)]
pub struct SendQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                ..Default::default()
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Point the queue at `device` (or nothing). Buffered records of any
    /// other device are discarded; returns how many.
    pub fn retarget(&self, device: Option<&str>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.items.len();
        match device {
            Some(d) => inner.items.retain(|r| r.device_id == d),
            None => inner.items.clear(),
        }
        inner.device = device.map(str::to_string);
        inner.generation += 1;
        before - inner.items.len()
    }

    /// Current subscription generation
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn push(&self, record: Arc<TelemetryRecord>) -> PushOutcome {
        self.push_inner(record, None)
    }

    /// Push only if the queue is still on subscription `generation`.
    pub fn push_at(&self, record: Arc<TelemetryRecord>, generation: u64) -> PushOutcome {
        self.push_inner(record, Some(generation))
    }

    fn push_inner(&self, record: Arc<TelemetryRecord>, generation: Option<u64>) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed
            || inner.device.as_deref() != Some(record.device_id.as_str())
            || generation.is_some_and(|g| g != inner.generation)
        {
            return PushOutcome::Rejected;
        }

        let outcome = if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            PushOutcome::Evicted
        } else {
            PushOutcome::Queued
        };
        inner.items.push_back(record);
        drop(inner);

        self.notify.notify_one();
        outcome
    }

    pub fn try_pop(&self) -> Option<Arc<TelemetryRecord>> {
        self.inner.lock().items.pop_front()
    }

    /// Next record in push order. Buffered records are still handed out
    /// after [`close`](Self::close); `None` once closed and empty.
    ///
    /// Single consumer: only the connection's delivery task calls this.
    pub async fn recv(&self) -> Option<Arc<TelemetryRecord>> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(record) = inner.items.pop_front() {
                    return Some(record);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting records. Idempotent.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    /// Discard everything buffered. Returns how many records were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.items.len();
        inner.items.clear();
        n
    }

    pub fn device(&self) -> Option<String> {
        self.inner.lock().device.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records evicted by overflow since the queue was created
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod tests;
