use std::collections::BTreeMap;
use std::future::Future;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use gyro_api::{SourceKind, StoreError, TelemetryRecord};
use gyro_engine::{ConnectionId, MetricsSnapshot, with_retry};

use super::AppState;
use crate::error::ApiError;

/// Store read with the engine's deadline and retry policy
async fn read_store<T, F, Fut>(state: &AppState, operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    Ok(with_retry(state.engine.persist_config(), || {}, operation).await?)
}

fn device_param(raw: &str) -> Result<&str, ApiError> {
    let device = raw.trim();
    if device.is_empty() {
        return Err(ApiError::BadRequest("device id is empty".into()));
    }
    Ok(device)
}

// ═══════════════════════════════════════════════════════════════
//  GET /api, GET /api/stats
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_hello() -> impl IntoResponse {
    Json(json!({ "message": "Hello from REST API!" }))
}

#[derive(Serialize)]
struct StatsResponse {
    metrics: MetricsSnapshot,
    active_connections: usize,
    upload_slot_holder: Option<ConnectionId>,
    cached_devices: usize,
    next_sequence: u64,
}

pub(crate) async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    let engine = &state.engine;
    Json(StatsResponse {
        metrics: engine.metrics().snapshot(),
        active_connections: engine.connections().active_connections(),
        upload_slot_holder: engine.connections().upload_slot_holder(),
        cached_devices: engine.cache().len(),
        next_sequence: engine.router().next_sequence(),
    })
}

// ═══════════════════════════════════════════════════════════════
//  Persisted records: GET /data, GET /data/{device}, GET /devices
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_all_data(State(state): State<AppState>) -> Result<Response, ApiError> {
    let store = state.engine.store().as_ref();
    let records = read_store(&state, move || store.find_all()).await?;
    Ok(Json(records).into_response())
}

pub(crate) async fn handle_device_data(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Response, ApiError> {
    let device = device_param(&device)?;
    let store = state.engine.store().as_ref();
    let records = read_store(&state, move || store.find_by_device(device)).await?;
    Ok(Json(records).into_response())
}

pub(crate) async fn handle_devices(State(state): State<AppState>) -> Result<Response, ApiError> {
    let store = state.engine.store().as_ref();
    let devices = read_store(&state, move || store.list_devices()).await?;
    Ok(Json(devices).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  Latest values (cache only)
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_latest_all(State(state): State<AppState>) -> Response {
    let all = state.engine.cache().get_all();
    let view: BTreeMap<&str, &TelemetryRecord> = all
        .iter()
        .map(|(device, record)| (device.as_str(), record.as_ref()))
        .collect();
    Json(view).into_response()
}

pub(crate) async fn handle_latest_device(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Response, ApiError> {
    latest(&state, &device)
}

#[derive(Deserialize)]
pub(crate) struct LatestRequest {
    #[serde(alias = "deviceaddress", alias = "deviceAddress", alias = "deviceId", alias = "device")]
    device_id: String,
}

pub(crate) async fn handle_latest_by_body(
    State(state): State<AppState>,
    Json(req): Json<LatestRequest>,
) -> Result<Response, ApiError> {
    latest(&state, &req.device_id)
}

fn latest(state: &AppState, device: &str) -> Result<Response, ApiError> {
    let device = device_param(device)?;
    match state.engine.cache().get(device) {
        Some(record) => Ok(Json(record.as_ref()).into_response()),
        None => Err(ApiError::not_found("device", device)),
    }
}

// ═══════════════════════════════════════════════════════════════
//  POST /store
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_store(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let record = state.engine.router().ingest(&body, SourceKind::Http)?;
    Ok(Json(json!({ "message": "Data stored!", "sequence": record.sequence })).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  POST /clean
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct CleanRequest {
    password: String,
    /// Confirmation; must equal `password`
    cfp: String,
}

pub(crate) async fn handle_clean(
    State(state): State<AppState>,
    Json(req): Json<CleanRequest>,
) -> Result<Response, ApiError> {
    let deleted = state.engine.admin().clean(&req.password, &req.cfp).await?;
    Ok(Json(json!({ "message": "Data cleaned!", "deleted": deleted })).into_response())
}
