use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use gyro_api::{StoreError, TelemetryRecord, TelemetryStore};

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryStoreConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Registry {
    order: Vec<String>,
    known: HashSet<String>,
}

/// In-memory ring-buffer store. Nothing survives a restart; once
/// `max_records` is reached the oldest record is evicted.
pub struct MemoryStore {
    records: RwLock<VecDeque<TelemetryRecord>>,
    devices: RwLock<Registry>,
    max_records: usize,
}

impl MemoryStore {
    pub fn new(max_records: usize) -> Self {
        let max_records = max_records.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(max_records.min(65536))),
            devices: RwLock::new(Registry::default()),
            max_records,
        }
    }

    pub fn from_config(config: &MemoryStoreConfig) -> Self {
        Self::new(config.max_records)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_max_records())
    }
}

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

impl TelemetryStore for MemoryStore {
    fn append(&self, record: &TelemetryRecord) -> StoreFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move {
            let mut buf = self.records.write().await;
            if buf.len() >= self.max_records {
                buf.pop_front();
            }
            buf.push_back(record);
            Ok(())
        })
    }

    fn find_all(&self) -> StoreFuture<'_, Vec<TelemetryRecord>> {
        Box::pin(async move { Ok(self.records.read().await.iter().cloned().collect()) })
    }

    fn find_by_device(&self, device_id: &str) -> StoreFuture<'_, Vec<TelemetryRecord>> {
        let device_id = device_id.to_string();
        Box::pin(async move {
            let buf = self.records.read().await;
            Ok(buf
                .iter()
                .filter(|r| r.device_id == device_id)
                .cloned()
                .collect())
        })
    }

    fn find_latest(&self, device_id: &str) -> StoreFuture<'_, Option<TelemetryRecord>> {
        let device_id = device_id.to_string();
        Box::pin(async move {
            let buf = self.records.read().await;
            Ok(buf
                .iter()
                .filter(|r| r.device_id == device_id)
                .max_by_key(|r| r.sequence)
                .cloned())
        })
    }

    fn delete_all(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut buf = self.records.write().await;
            let n = buf.len() as u64;
            buf.clear();
            Ok(n)
        })
    }

    fn register_device(&self, device_id: &str) -> StoreFuture<'_, ()> {
        let device_id = device_id.to_string();
        Box::pin(async move {
            let mut reg = self.devices.write().await;
            if reg.known.insert(device_id.clone()) {
                reg.order.push(device_id);
            }
            Ok(())
        })
    }

    fn list_devices(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.devices.read().await.order.clone()) })
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
