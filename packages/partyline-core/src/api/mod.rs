//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the [`Hub`]. It
//! provides the router construction and server startup functionality.

use std::sync::Arc;

use thiserror::Error;

use crate::events::BroadcastEventBridge;
use crate::session::Hub;
use crate::state::HubConfig;

pub mod http;
pub mod response;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the configured TCP port.
    #[error("failed to bind to port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
}

/// Shared application state for the API layer.
///
/// A thin wrapper around the hub and its event bridge; all business logic
/// lives in [`Hub`] itself.
#[derive(Clone)]
pub struct AppState {
    /// The relay hub.
    pub hub: Arc<Hub>,
    /// Event bridge for subscribing to real-time session/stream events.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Hub-wide configuration (port, CORS origins, ...).
    pub config: Arc<HubConfig>,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, event_bridge: Arc<BroadcastEventBridge>, config: Arc<HubConfig>) -> Self {
        Self {
            hub,
            event_bridge,
            config,
        }
    }
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let port = state.config.port;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { port, source })?;

    log::info!("[Server] listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|source| ServerError::Bind { port, source })?;
    Ok(())
}
