//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::BroadcastEventBridge;
use crate::services::MusicService;
use crate::state::Config;

pub mod http;
pub mod response;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on the TCP listener.
    #[error("Failed to serve on {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Room commands.
    pub music: Arc<MusicService>,
    /// Event bridge feeding WebSocket clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Core configuration, read-only after bootstrap.
    pub config: Arc<Config>,
    /// Fires when the process begins shutting down.
    pub shutdown: CancellationToken,
}

/// Binds `addr` and serves the API until the shutdown token fires.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Io { addr, source })?;
    let local = listener.local_addr().unwrap_or(addr);
    log::info!("[Api] Server listening on http://{}", local);

    let shutdown = state.shutdown.clone();
    let app = http::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|source| ServerError::Io { addr, source })?;

    log::info!("[Api] Server stopped");
    Ok(())
}
