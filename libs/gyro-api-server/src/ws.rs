use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use gyro_api::{SourceKind, TelemetryRecord};
use gyro_engine::{Connection, DeliveryError, RecordSink};

use super::AppState;
use crate::error::ApiError;

/// Floor for the upload-socket ping period
const MIN_PING_PERIOD: Duration = Duration::from_millis(10);

type WsWriter = Arc<Mutex<SplitSink<WebSocket, Message>>>;

fn shutting_down(state: &AppState) -> Option<Response> {
    if state.engine.connections().is_shutting_down() {
        return Some(ApiError::Unavailable("server is shutting down".into()).into_response());
    }
    None
}

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws (subscribe)
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_ws(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Some(resp) = shutting_down(&state) {
        return resp;
    }
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| subscribe_connection(socket, state)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Client message selecting the device to stream
#[derive(Deserialize)]
struct SubscribeRequest {
    #[serde(alias = "deviceaddress", alias = "deviceAddress", alias = "deviceId", alias = "device")]
    device_id: String,
}

/// Writer half of a subscribe socket, shared between the delivery task
/// and the reader (for error replies).
struct WsSink(WsWriter);

impl RecordSink for WsSink {
    fn send<'a>(&'a mut self, record: &'a TelemetryRecord)
        -> Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>
    {
        Box::pin(async move {
            let json = serde_json::to_string(record).map_err(|e| DeliveryError(e.to_string()))?;
            self.0
                .lock()
                .await
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| DeliveryError(e.to_string()))
        })
    }
}

async fn subscribe_connection(socket: WebSocket, state: AppState) {
    let manager = state.engine.connections();
    let conn = manager.admit_subscriber();
    let (sink, mut stream) = socket.split();
    let writer: WsWriter = Arc::new(Mutex::new(sink));
    let delivery = manager.spawn_delivery(&conn, WsSink(Arc::clone(&writer)));

    loop {
        let msg = tokio::select! {
            _ = conn.cancelled() => break,
            msg = stream.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(t))) => t,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                conn.close();
                break;
            }
            Some(Ok(_)) => continue,
        };

        if let Err(reply) = apply_subscription(&conn, text.as_str()) {
            let sent = writer
                .lock()
                .await
                .send(Message::Text(reply.to_string().into()))
                .await;
            if sent.is_err() {
                conn.close();
                break;
            }
        }
    }

    // On shutdown the delivery task flushes what is buffered first.
    if let Some(delivery) = delivery {
        let _ = delivery.await;
    }
    conn.close();
    let _ = writer.lock().await.close().await;
}

/// (Re)subscribe `conn` to the device named in `text`. Returns the error
/// frame to send back if the message is unusable.
fn apply_subscription(conn: &Connection, text: &str) -> Result<(), serde_json::Value> {
    let req: SubscribeRequest =
        serde_json::from_str(text).map_err(|e| json!({ "error": format!("parse: {e}") }))?;
    let device = req.device_id.trim();
    if device.is_empty() {
        return Err(json!({ "error": "device id is empty" }));
    }
    let previous = conn
        .subscribe(device)
        .map_err(|e| json!({ "error": e.to_string() }))?;
    tracing::info!(conn = conn.id(), device, previous = ?previous, "subscriber switched device");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws/store (exclusive upload)
// ═══════════════════════════════════════════════════════════════

/// The upload slot is taken before the upgrade so a second uploader gets
/// a plain 409 instead of a socket that closes immediately.
pub(crate) async fn handle_ws_store(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Some(resp) = shutting_down(&state) {
        return resp;
    }
    let conn = match state.engine.connections().admit_uploader() {
        Ok(conn) => conn,
        Err(e) => return ApiError::from(e).into_response(),
    };
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| upload_connection(socket, state, conn)),
        // Dropping `conn` releases the slot.
        Err(rejection) => rejection.into_response(),
    }
}

async fn upload_connection(mut socket: WebSocket, state: AppState, conn: Arc<Connection>) {
    let router = state.engine.router();
    let idle = state.upload_idle;
    // Pings make a live but quiet client answer; a half-open one never does.
    let mut ping = tokio::time::interval((idle / 2).max(MIN_PING_PERIOD));
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut last_seen = Instant::now();

    loop {
        let msg = tokio::select! {
            _ = conn.cancelled() => break,
            _ = ping.tick() => {
                if last_seen.elapsed() >= idle {
                    tracing::warn!(
                        conn = conn.id(),
                        idle_ms = idle.as_millis() as u64,
                        "upload socket silent, releasing slot"
                    );
                    break;
                }
                if socket.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                continue;
            }
            msg = socket.recv() => msg,
        };
        last_seen = Instant::now();

        let result = match msg {
            Some(Ok(Message::Text(t))) => router.ingest(t.as_str().as_bytes(), SourceKind::UploadSocket),
            Some(Ok(Message::Binary(b))) => router.ingest(&b, SourceKind::UploadSocket),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => continue,
        };

        if !state.upload_ack {
            continue;
        }
        let reply = match result {
            Ok(record) => json!({ "message": "Data stored!", "sequence": record.sequence }),
            Err(e) => json!({ "error": e.to_string() }),
        };
        if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
            break;
        }
    }

    conn.close();
    let _ = socket.send(Message::Close(None)).await;
}
