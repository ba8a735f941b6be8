//! HTTP control API.
//!
//! Thin handlers over the session coordinator: list sinks and sessions,
//! deliver stream-ready signals, and report sinks as lost.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::NetworkContext;
use crate::coordinator::SessionCoordinator;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub network: NetworkContext,
}

impl AppState {
    pub fn new(coordinator: Arc<SessionCoordinator>, network: NetworkContext) -> Self {
        Self {
            coordinator,
            network,
        }
    }
}

/// Binds `0.0.0.0:port` and serves the API until `cancel` fires.
pub async fn start_server(
    state: AppState,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, state, cancel).await
}

/// Serves the API on an already bound listener until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    log::info!("[API] Listening on http://{}", listener.local_addr()?);
    let app = http::create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    log::info!("[API] Stopped");
    Ok(())
}
