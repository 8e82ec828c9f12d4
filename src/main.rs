//! chatbridge-server: HTTP facade + relay server.
//!
//! Listens on two addresses, mirroring the original bridge layout: the
//! public API on one port and the agent WebSocket (`/bridge`) on another.

use std::future::IntoFuture;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatbridge::api::{self, AppState};
use chatbridge::config::ServerConfig;
use chatbridge::relay::{ws, RelayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let relay = RelayServer::new();

    let state = Arc::new(AppState {
        relay: Arc::clone(&relay),
        config: config.clone(),
    });

    let http_listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    let ws_listener = tokio::net::TcpListener::bind(config.ws_addr).await?;
    info!(addr = %config.http_addr, "HTTP API listening");
    info!(addr = %config.ws_addr, "agent WebSocket listening on /bridge");

    let http = axum::serve(http_listener, api::router(state)).into_future();
    let bridge = axum::serve(ws_listener, ws::router(relay)).into_future();

    tokio::try_join!(http, bridge)?;
    Ok(())
}
