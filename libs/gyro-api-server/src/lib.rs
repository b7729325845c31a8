//! HTTP + WebSocket surface of the gyro telemetry hub.
//!
//! REST reads go to the latest-value cache or the store, writes go
//! through the ingest router. `/ws` streams one device's records to a
//! subscriber, `/ws/store` is the single upload socket.

mod error;
mod http;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use gyro_engine::GyroEngine;

pub use error::ApiError;

/// Default silence allowed on the upload socket
pub const DEFAULT_UPLOAD_IDLE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    engine: Arc<GyroEngine>,
    /// Reply to every upload-socket message
    upload_ack: bool,
    /// Upload socket is closed after this long without any frame,
    /// pongs included; the slot is released with it
    upload_idle: Duration,
}

impl AppState {
    pub fn new(engine: Arc<GyroEngine>, upload_ack: bool) -> Self {
        Self {
            engine,
            upload_ack,
            upload_idle: DEFAULT_UPLOAD_IDLE,
        }
    }

    pub fn with_upload_idle(mut self, idle: Duration) -> Self {
        self.upload_idle = idle;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(http::handle_hello))
        .route("/api/stats", get(http::handle_stats))
        .route("/data", get(http::handle_all_data))
        .route("/data/{device}", get(http::handle_device_data))
        .route("/latest", get(http::handle_latest_all).post(http::handle_latest_by_body))
        .route("/latest/{device}", get(http::handle_latest_device))
        .route("/store", post(http::handle_store))
        .route("/clean", post(http::handle_clean))
        .route("/devices", get(http::handle_devices))
        .route("/ws", get(ws::handle_ws))
        .route("/ws/store", get(ws::handle_ws_store))
        .with_state(state)
}

/// Serve the API on `0.0.0.0:port` until `shutdown` is cancelled.
pub async fn run(port: u16, state: AppState, shutdown: CancellationToken) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;
    tracing::info!(port, "api listening");

    serve(listener, state, shutdown).await
}

/// Serve the API on an already bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), String> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
