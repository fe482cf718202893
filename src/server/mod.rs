//! HTTP server for the relay.
//!
//! Serves the chat page and the JSON/SSE API, forwarding every chat to the
//! inference daemon.

pub mod handlers;

use crate::config::Config;
use crate::daemon::DaemonClient;
use crate::netinfo;
use crate::observer::{RelayObserver, TracingObserver};
use anyhow::{Context, Result};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// State shared by every handler. Immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub daemon: DaemonClient,
    pub observer: Arc<dyn RelayObserver>,
}

impl AppState {
    pub fn new(daemon: DaemonClient, observer: Arc<dyn RelayObserver>) -> Self {
        Self { daemon, observer }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/status", get(handlers::status))
        .route("/chat", post(handlers::chat))
        .route("/stream_chat", post(handlers::stream_chat))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST]),
        )
        .with_state(state)
}

/// The relay server: owns the configuration and the shared state.
pub struct RelayServer {
    config: Config,
    state: AppState,
}

impl RelayServer {
    /// Create a new relay server that logs through `tracing`.
    pub fn new(config: Config) -> Result<Self> {
        let daemon = DaemonClient::new(config.daemon.clone())?;
        let state = AppState::new(daemon, Arc::new(TracingObserver));
        Ok(Self { config, state })
    }

    /// Bind and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        // The daemon may start after us, so an unhealthy daemon is not fatal.
        info!("Checking daemon health...");
        match self.state.daemon.health_check().await {
            Ok(()) => info!(
                "Daemon ready: {} ({})",
                self.state.daemon.base_url(),
                self.state.daemon.model()
            ),
            Err(e) => warn!("Daemon not reachable yet: {:#}", e),
        }

        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        let local = listener.local_addr().context("Failed to read local address")?;
        info!("Relay listening on {}", local);
        info!("Open from other devices: {}", netinfo::lan_url(local.port()));

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("Shutting down...");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
