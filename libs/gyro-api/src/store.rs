use std::future::Future;
use std::pin::Pin;

use crate::{StoreError, TelemetryRecord};

// ════════════════════════════════════════════════════════════════
//  Persistence collaborator
// ════════════════════════════════════════════════════════════════

/// Durable append/query store for telemetry records and the device
/// registry. One instance is created at startup and shared by handle.
///
/// Backends: memory storage, JSON-lines file storage.
pub trait TelemetryStore: Send + Sync {
    /// Append one record. Records are never updated in place.
    fn append(&self, record: &TelemetryRecord)
        -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Every stored record, in append order.
    fn find_all(&self)
        -> Pin<Box<dyn Future<Output = Result<Vec<TelemetryRecord>, StoreError>> + Send + '_>>;

    /// Records of one device, in append order.
    fn find_by_device(&self, device_id: &str)
        -> Pin<Box<dyn Future<Output = Result<Vec<TelemetryRecord>, StoreError>> + Send + '_>>;

    /// Highest-sequence record of one device.
    fn find_latest(&self, device_id: &str)
        -> Pin<Box<dyn Future<Output = Result<Option<TelemetryRecord>, StoreError>> + Send + '_>>;

    /// Delete every record. Returns how many were removed.
    /// The device registry is kept.
    fn delete_all(&self)
        -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>>;

    /// Add a device to the registry. Registering twice is a no-op.
    fn register_device(&self, device_id: &str)
        -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Registered device ids, in registration order.
    fn list_devices(&self)
        -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>>;

    /// Flush buffers (graceful shutdown).
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
