//! REST API route handlers.
//!
//! Stream endpoints return the latest raw message exactly as received (or as
//! annotated, for detections), empty until the first one arrives.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use bistatic_core::types::StreamKind;

use crate::web::AppState;

fn latest(state: &AppState, kind: StreamKind) -> String {
    state.store.get(kind)
}

/// GET /
pub async fn index() -> &'static str {
    "Hello World"
}

// ---------------------------------------------------------------------------
// Stream endpoints
// ---------------------------------------------------------------------------

pub async fn api_map(State(state): State<Arc<AppState>>) -> String {
    latest(&state, StreamKind::Map)
}

pub async fn api_detection(State(state): State<Arc<AppState>>) -> String {
    latest(&state, StreamKind::Detection)
}

/// GET /api/tracker — latest message from the track stream.
pub async fn api_tracker(State(state): State<Arc<AppState>>) -> String {
    latest(&state, StreamKind::Track)
}

pub async fn api_timestamp(State(state): State<Arc<AppState>>) -> String {
    latest(&state, StreamKind::Timestamp)
}

pub async fn api_timing(State(state): State<Arc<AppState>>) -> String {
    latest(&state, StreamKind::Timing)
}

pub async fn api_iqdata(State(state): State<Arc<AppState>>) -> String {
    latest(&state, StreamKind::IqData)
}

// ---------------------------------------------------------------------------
// Config and truth
// ---------------------------------------------------------------------------

/// GET /api/config — effective merged configuration.
pub async fn api_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.as_ref().clone())
}

/// GET /api/adsb2dd — truth document for the configured mode; 400 when
/// ADS-B truth is disabled.
pub async fn api_adsb2dd(State(state): State<Arc<AppState>>) -> Response {
    match &state.query {
        Some(query) if state.config.truth.adsb.enabled => Json(query.aircraft_truth().await).into_response(),
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Capture flag
// ---------------------------------------------------------------------------

pub async fn capture(State(state): State<Arc<AppState>>) -> Json<bool> {
    Json(state.capture.load(Ordering::Relaxed))
}

/// GET /capture/toggle — flip the capture flag.
pub async fn capture_toggle(State(state): State<Arc<AppState>>) -> &'static str {
    state.capture.fetch_xor(true, Ordering::Relaxed);
    "{}"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
