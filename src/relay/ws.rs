//! WebSocket endpoint the agent connects to (`/bridge`).
//!
//! Each accepted socket becomes *the* transport: its outbound channel is
//! handed to the relay's connection manager, replacing whatever was there.
//! Inbound text frames are parsed and fed to the relay's demultiplexer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::RelayServer;
use crate::protocol::WireMessage;

/// Router for the agent-facing listener.
pub fn router(relay: Arc<RelayServer>) -> Router {
    Router::new()
        .route("/bridge", get(bridge_handler))
        .with_state(relay)
}

async fn bridge_handler(
    ws: WebSocketUpgrade,
    State(relay): State<Arc<RelayServer>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<RelayServer>) {
    info!("agent connected");
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireMessage>();
    relay.transport().replace(outbound_tx.clone());

    // Pump frames queued by the relay out to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            // WireMessage is plain data; serialization cannot fail.
            let json = serde_json::to_string(&msg).unwrap_or_default();
            if sink.send(Message::Text(json)).await.is_err() {
                debug!("agent sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<WireMessage>(&text) {
                Ok(msg) => {
                    debug!(kind = msg.kind(), "frame from agent");
                    relay.handle_message(msg);
                }
                Err(e) => {
                    warn!(error = %e, raw = %text, "malformed agent frame dropped");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled at the protocol level by axum.
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "agent receive error");
                break;
            }
        }
    }

    // Only clear the transport if this connection still owns it; a newer
    // agent connection may have replaced it already.
    relay.transport().clear_if_current(&outbound_tx);
    send_task.abort();
    info!("agent disconnected");
}
