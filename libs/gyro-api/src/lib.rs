//! Shared data model and collaborator traits for the gyro telemetry hub.
//!
//! Everything that crosses a crate boundary lives here: the canonical
//! [`TelemetryRecord`], the producer-facing [`Reading`], the persistence
//! collaborator ([`TelemetryStore`]) and the message-bus collaborator
//! ([`MessageBus`]). The crate has no runtime dependency on tokio.

pub mod bus;
pub mod error;
pub mod record;
pub mod store;

pub use bus::{BusHandler, MessageBus, Qos};
pub use error::{BusError, ErrorKind, ReadingError, StoreError};
pub use record::{Axes, Reading, SourceKind, TelemetryRecord};
pub use store::TelemetryStore;
