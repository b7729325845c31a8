use gyro_api::{ReadingError, StoreError};

use crate::connection::ConnectionId;

/// Malformed ingest payload. Dropped and logged, never retried.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("parse: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid reading: {0}")]
    Invalid(#[from] ReadingError),
}

/// The ingest-exclusive upload slot already has a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("upload slot held by connection {holder}")]
pub struct ConflictError {
    pub holder: ConnectionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("password doesn't match")]
    Mismatch,

    #[error("invalid password")]
    InvalidPassword,
}

#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// Transport write failed; the connection is torn down.
#[derive(Debug, thiserror::Error)]
#[error("delivery: {0}")]
pub struct DeliveryError(pub String);
