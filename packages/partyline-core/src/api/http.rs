//! HTTP route handlers: health, status, and presence introspection.
//!
//! All handlers are thin - they delegate to the [`Hub`](crate::session::Hub)
//! for anything beyond shaping the JSON body.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::response::api_success;
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::protocol_constants::APP_NAME;
use crate::state::PeerRole;

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/devices", get(devices))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

fn uptime_secs() -> u64 {
    static STARTED_AT: OnceLock<Instant> = OnceLock::new();
    STARTED_AT.get_or_init(Instant::now).elapsed().as_secs()
}

fn role_counts(state: &AppState) -> (usize, usize) {
    let snapshot = state.hub.presence().snapshot();
    let sources = snapshot.iter().filter(|p| p.role == PeerRole::Source).count();
    let listeners = snapshot.iter().filter(|p| p.role == PeerRole::Listener).count();
    (sources, listeners)
}

/// Liveness probe: "is the process running?"
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (sources, listeners) = role_counts(&state);
    api_success(json!({
        "status": "ok",
        "service": APP_NAME,
        "uptimeSecs": uptime_secs(),
        "sources": sources,
        "listeners": listeners,
    }))
}

/// Hub-wide status: peer count, source/listener breakdown, configured
/// ceilings.
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let (sources, listeners) = role_counts(&state);

    api_success(json!({
        "service": APP_NAME,
        "uptimeSecs": uptime_secs(),
        "peers": state.hub.presence().peer_count(),
        "sources": sources,
        "listeners": listeners,
        "maxPacketsPerSec": state.config.max_packets_per_sec,
        "historyMax": state.config.history_max,
    }))
}

/// Full presence snapshot, the same payload broadcast as `deviceList`.
async fn devices(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({ "devices": state.hub.presence().snapshot() }))
}
