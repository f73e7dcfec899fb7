//! Web server — axum API over the latest stream values, the truth query, and
//! the capture flag.
//!
//! Every response is uncacheable and open to any origin; the radar web UI
//! polls these endpoints from other hosts.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use http::header::{self, HeaderValue};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use bistatic_core::config::Config;
use bistatic_core::types::Result;

use crate::query::TruthQuery;
use crate::store::LatestValues;

pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub store: Arc<LatestValues>,
    /// `None` when ADS-B truth is disabled.
    pub query: Option<Arc<TruthQuery>>,
    pub config: Arc<Config>,
    pub capture: AtomicBool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::index))
        .route("/api/map", get(routes::api_map))
        .route("/api/detection", get(routes::api_detection))
        .route("/api/tracker", get(routes::api_tracker))
        .route("/api/timestamp", get(routes::api_timestamp))
        .route("/api/timing", get(routes::api_timing))
        .route("/api/iqdata", get(routes::api_iqdata))
        .route("/api/config", get(routes::api_config))
        .route("/api/adsb2dd", get(routes::api_adsb2dd))
        .route("/capture", get(routes::capture))
        .route("/capture/toggle", get(routes::capture_toggle))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("private, no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("-1"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(cors)
}

/// Serve the API on `host:port` until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
