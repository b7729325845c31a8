use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReadingError;

// ════════════════════════════════════════════════════════════════
//  Source Kind
// ════════════════════════════════════════════════════════════════

/// Producer that handed a payload to the ingest router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Message-bus topic (MQTT).
    Bus,
    /// `POST /store`.
    Http,
    /// Exclusive upload WebSocket.
    UploadSocket,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Bus => write!(f, "bus"),
            SourceKind::Http => write!(f, "http"),
            SourceKind::UploadSocket => write!(f, "upload_socket"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Axes
// ════════════════════════════════════════════════════════════════

/// Three-axis sample (rad/s for the gyroscope, m/s² for the accelerometer).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Axes {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ════════════════════════════════════════════════════════════════
//  Reading
// ════════════════════════════════════════════════════════════════

/// Payload as sent by producers, before the router assigns ordering.
///
/// Unknown fields are ignored, including any producer-side `sequence`
/// or timestamp: ordering is owned by the router.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reading {
    #[serde(
        alias = "deviceaddress",
        alias = "deviceAddress",
        alias = "deviceId",
        alias = "device"
    )]
    pub device_id: String,
    pub gyro: Axes,
    #[serde(default)]
    pub accel: Option<Axes>,
}

impl Reading {
    /// Trim the device id and reject readings that cannot be stored.
    pub fn validate(mut self) -> Result<Self, ReadingError> {
        let trimmed = self.device_id.trim();
        if trimmed.is_empty() {
            return Err(ReadingError::EmptyDevice);
        }
        if trimmed.len() != self.device_id.len() {
            self.device_id = trimmed.to_string();
        }
        if !self.gyro.is_finite() {
            return Err(ReadingError::NonFinite("gyro"));
        }
        if let Some(accel) = &self.accel {
            if !accel.is_finite() {
                return Err(ReadingError::NonFinite("accel"));
            }
        }
        Ok(self)
    }
}

// ════════════════════════════════════════════════════════════════
//  TelemetryRecord
// ════════════════════════════════════════════════════════════════

/// Canonical, immutable telemetry record.
///
/// `sequence` is the only ordering key. `received_at` is kept for
/// display and audit and is never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub gyro: Axes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accel: Option<Axes>,
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn from_reading(reading: Reading, sequence: u64, received_at: DateTime<Utc>) -> Self {
        Self {
            device_id: reading.device_id,
            gyro: reading.gyro,
            accel: reading.accel,
            sequence,
            received_at,
        }
    }
}

#[cfg(test)]
#[path = "record_test.rs"]
mod tests;
