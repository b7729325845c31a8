//! Persistence worker
//!
//! The router never waits on storage. Records go through a bounded
//! channel to one worker task that appends them with a per-attempt
//! deadline and a fixed-backoff retry on transient failures. A full
//! channel or a record the store never accepts is counted and logged;
//! publishing carries on either way.
//!
//! Wipes travel the same channel, so every record queued before a wipe
//! is appended before the store is emptied and cannot resurface after it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gyro_api::{StoreError, TelemetryRecord, TelemetryStore};

use crate::config::PersistConfig;
use crate::metrics::IngestMetrics;

#[derive(Debug)]
enum Command {
    Append(Arc<TelemetryRecord>),
    /// Delete every stored record once the appends ahead of it are done
    Wipe(oneshot::Sender<Result<u64, StoreError>>),
}

#[derive(Debug, Clone)]
pub struct PersistWriter {
    tx: mpsc::Sender<Command>,
    metrics: Arc<IngestMetrics>,
}

impl PersistWriter {
    /// Start the worker. It runs until `token` is cancelled, then appends
    /// whatever is still queued and flushes the store.
    pub fn spawn(
        store: Arc<dyn TelemetryStore>,
        config: PersistConfig,
        metrics: Arc<IngestMetrics>,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue.max(1));
        let worker = Worker {
            store,
            config,
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(worker.run(rx, token));
        (Self { tx, metrics }, handle)
    }

    /// Queue a record for persistence without waiting. Returns false if
    /// the record was dropped (queue full or worker gone).
    pub fn submit(&self, record: Arc<TelemetryRecord>) -> bool {
        match self.tx.try_send(Command::Append(record)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(Command::Append(record))) => {
                self.metrics.record_persist_dropped();
                tracing::warn!(
                    device = %record.device_id,
                    sequence = record.sequence,
                    "persist queue full, record not stored"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(Command::Append(record))) => {
                self.metrics.record_persist_dropped();
                tracing::debug!(
                    sequence = record.sequence,
                    "persist worker stopped, record not stored"
                );
                false
            }
            Err(_) => false,
        }
    }

    /// Queue a wipe behind every record submitted so far and wait for it.
    ///
    /// Returns `None` when the worker has stopped; nothing is queued then
    /// and the caller may delete from the store directly.
    pub async fn wipe(&self) -> Option<Result<u64, StoreError>> {
        let (reply, done) = oneshot::channel();
        self.tx.send(Command::Wipe(reply)).await.ok()?;
        done.await.ok()
    }
}

struct Worker {
    store: Arc<dyn TelemetryStore>,
    config: PersistConfig,
    metrics: Arc<IngestMetrics>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Command>, token: CancellationToken) {
        tracing::debug!(queue = self.config.queue, "persist worker started");
        loop {
            let command = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                command = rx.recv() => command,
            };
            match command {
                Some(command) => self.handle(command).await,
                None => break,
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Ok(command) = rx.try_recv() {
            self.handle(command).await;
            drained += 1;
        }
        if let Err(e) = self.store.flush().await {
            tracing::error!(error = %e, "store flush failed");
        }
        tracing::info!(drained, "persist worker stopped");
    }

    async fn handle(&self, command: Command) {
        match command {
            Command::Append(record) => self.persist(&record).await,
            Command::Wipe(reply) => {
                let store = self.store.as_ref();
                let result = with_retry(&self.config, || {}, move || store.delete_all()).await;
                if reply.send(result).is_err() {
                    tracing::warn!("wipe finished after its caller gave up");
                }
            }
        }
    }

    async fn persist(&self, record: &TelemetryRecord) {
        match append_with_retry(self.store.as_ref(), record, &self.config, &self.metrics).await {
            Ok(()) => self.metrics.record_persisted(),
            Err(e) => {
                self.metrics.record_persist_failure();
                tracing::error!(
                    device = %record.device_id,
                    sequence = record.sequence,
                    kind = %e.kind(),
                    error = %e,
                    "record not persisted"
                );
            }
        }
    }
}

/// Run a store call with a deadline per attempt. Transient failures are
/// retried `max_retries` times with a fixed backoff, calling `on_retry`
/// before each repeat; anything else fails at once.
pub async fn with_retry<T, F, Fut>(
    config: &PersistConfig,
    mut on_retry: impl FnMut(),
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = config.max_retries.saturating_add(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(config.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(config.timeout)),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                on_retry();
                tracing::debug!(
                    attempt,
                    max = attempts,
                    backoff_ms = config.backoff.as_millis() as u64,
                    error = %e,
                    "retrying store call after transient error"
                );
                tokio::time::sleep(config.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`with_retry`] for one append, counting retries in `metrics`.
pub async fn append_with_retry(
    store: &dyn TelemetryStore,
    record: &TelemetryRecord,
    config: &PersistConfig,
    metrics: &IngestMetrics,
) -> Result<(), StoreError> {
    with_retry(config, || metrics.record_persist_retry(), move || store.append(record)).await
}

#[cfg(test)]
#[path = "persist_test.rs"]
mod tests;
