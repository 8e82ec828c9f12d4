//! Agent-side WebSocket session with the relay server.
//!
//! Connects, announces itself, then relays inbound `job` frames into the
//! queue and queue lifecycle events back out. Reconnects with a fixed short
//! delay when the connection drops; a `configure` frame switches the target
//! URL before the next connection attempt.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::agent::queue::{QueueEvent, QueueHandle};
use crate::config::AgentConfig;
use crate::protocol::WireMessage;

/// Run the session loop indefinitely, reconnecting with a fixed delay.
pub async fn run(
    cfg: AgentConfig,
    queue: QueueHandle,
    mut events: mpsc::UnboundedReceiver<QueueEvent>,
) {
    let mut url = cfg.server_url.clone();
    loop {
        info!(url = %url, "connecting to relay server");
        match connect_async(&url).await {
            Ok((ws_stream, _response)) => {
                info!("transport connected");
                if let Some(new_url) = run_session(ws_stream, &queue, &mut events).await {
                    info!(url = %new_url, "reconfigured transport URL");
                    url = new_url;
                } else {
                    warn!("transport session ended, reconnecting");
                }
            }
            Err(e) => {
                warn!(error = %e, "transport connection failed");
            }
        }
        tokio::time::sleep(cfg.reconnect_delay).await;
    }
}

/// Drive one connected session. Returns a replacement URL if the server sent
/// a `configure` frame.
async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    queue: &QueueHandle,
    events: &mut mpsc::UnboundedReceiver<QueueEvent>,
) -> Option<String> {
    let (mut sink, mut stream) = ws_stream.split();

    let hello = WireMessage::Hello {
        from: "chatbridge-agent".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if send(&mut sink, &hello).await.is_err() {
        return None;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                // The queue handle outlives the session; recv only fails at
                // shutdown.
                let event = event?;
                let msg = lifecycle_frame(event);
                if send(&mut sink, &msg).await.is_err() {
                    return None;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match handle_frame(&mut sink, queue, &text).await {
                            FrameOutcome::Continue => {}
                            FrameOutcome::Reconfigure(url) => return Some(url),
                            FrameOutcome::Closed => return None,
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed transport");
                        return None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "transport receive error");
                        return None;
                    }
                    None => return None,
                }
            }
        }
    }
}

enum FrameOutcome {
    Continue,
    Reconfigure(String),
    Closed,
}

async fn handle_frame<S>(sink: &mut S, queue: &QueueHandle, text: &str) -> FrameOutcome
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let msg: WireMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, raw = %text, "malformed frame dropped");
            return FrameOutcome::Continue;
        }
    };
    debug!(kind = msg.kind(), "frame received");

    match msg {
        WireMessage::Ping => {
            if send(sink, &WireMessage::Pong).await.is_err() {
                return FrameOutcome::Closed;
            }
        }
        WireMessage::Configure { ws_url } => {
            return FrameOutcome::Reconfigure(ws_url);
        }
        WireMessage::Job(job) => {
            queue.enqueue(job);
        }
        WireMessage::Pong | WireMessage::Hello { .. } => {}
        other => {
            debug!(kind = other.kind(), "ignoring server frame");
        }
    }
    FrameOutcome::Continue
}

/// Map a queue lifecycle event to its wire frame.
fn lifecycle_frame(event: QueueEvent) -> WireMessage {
    match event {
        QueueEvent::Started { id, host_ref } => WireMessage::JobStarted { id, host_ref },
        QueueEvent::Delta { id, delta } => WireMessage::Delta { id, delta },
        QueueEvent::Done { id, text } => WireMessage::Done { id, text },
        QueueEvent::Error { id, error } => WireMessage::JobError {
            id,
            error: error.code().to_string(),
            detail: Some(error.to_string()),
        },
    }
}

async fn send<S>(
    sink: &mut S,
    msg: &WireMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    // WireMessage is plain data; serialization cannot fail.
    let json = serde_json::to_string(msg).unwrap_or_default();
    sink.send(Message::Text(json)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn lifecycle_events_map_to_wire_frames() {
        let frame = lifecycle_frame(QueueEvent::Error {
            id: "j1".into(),
            error: BridgeError::TargetNotFound,
        });
        match frame {
            WireMessage::JobError { id, error, detail } => {
                assert_eq!(id, "j1");
                assert_eq!(error, "TARGET_NOT_FOUND");
                assert_eq!(detail.as_deref(), Some("no chat tab found"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let frame = lifecycle_frame(QueueEvent::Delta {
            id: "j1".into(),
            delta: "Hel".into(),
        });
        assert_eq!(frame.kind(), "delta");
    }
}
