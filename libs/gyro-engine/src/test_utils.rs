//! Shared helpers for engine unit tests

use std::sync::Arc;

use chrono::Utc;

use gyro_api::{Axes, TelemetryRecord};

/// Record for `device` with the given sequence and a fixed sample
pub(crate) fn record(device: &str, sequence: u64) -> Arc<TelemetryRecord> {
    Arc::new(TelemetryRecord {
        device_id: device.to_string(),
        gyro: Axes::new(0.5, -0.25, sequence as f64),
        accel: None,
        sequence,
        received_at: Utc::now(),
    })
}

/// JSON payload a producer would send for `device`
pub(crate) fn payload(device: &str) -> Vec<u8> {
    format!(r#"{{"deviceaddress":"{device}","gyro":{{"x":1.0,"y":2.0,"z":3.0}}}}"#).into_bytes()
}
