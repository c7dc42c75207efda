//! Shore signaling relay: a presence table plus verbatim forwarding of call
//! negotiation messages between identities.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod presence;
pub mod routing;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::presence::{InMemoryPresence, PresenceDirectory};
use crate::routing::SignalRouter;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct RelayState {
    pub router: SignalRouter,
}

impl RelayState {
    pub fn new(presence: Arc<dyn PresenceDirectory>) -> Self {
        Self {
            router: SignalRouter::new(presence),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryPresence::new()))
    }
}

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/presence", get(handlers::online_users))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind { addr, source })
}

/// Serves the relay on an already-bound listener until the future resolves.
pub async fn serve(
    listener: TcpListener,
    state: RelayState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), RelayError> {
    if let Ok(addr) = listener.local_addr() {
        info!("shore relay listening on {}", addr);
    }
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
