//! Exclusively-owned connection manager for the agent transport.
//!
//! The relay holds at most one live transport. A new connection
//! unconditionally replaces the previous one; the discarded sender closes
//! the old connection's outbound pump. There is no multiplexing of multiple
//! agents.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::protocol::WireMessage;

/// Outbound half of the agent connection.
pub type TransportSender = mpsc::UnboundedSender<WireMessage>;

#[derive(Default)]
pub struct Transport {
    current: Mutex<Option<TransportSender>>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt `tx` as the live transport, discarding any previous one.
    pub fn replace(&self, tx: TransportSender) {
        let mut current = self.current.lock().unwrap();
        if current.is_some() {
            info!("replacing existing agent transport");
        }
        *current = Some(tx);
    }

    /// Drop the live transport, but only if `tx` is still it. A connection
    /// that was already replaced must not clear its successor.
    pub fn clear_if_current(&self, tx: &TransportSender) {
        let mut current = self.current.lock().unwrap();
        if current
            .as_ref()
            .is_some_and(|cur| cur.same_channel(tx))
        {
            *current = None;
            info!("agent transport disconnected");
        }
    }

    /// Send a frame to the agent. Fails synchronously with
    /// [`BridgeError::TransportNotConnected`] when no live transport exists;
    /// a sender whose connection died is cleared on the way out.
    pub fn send(&self, msg: WireMessage) -> Result<(), BridgeError> {
        let mut current = self.current.lock().unwrap();
        let tx = current
            .as_ref()
            .ok_or(BridgeError::TransportNotConnected)?;
        debug!(kind = msg.kind(), "frame to agent");
        if tx.send(msg).is_err() {
            *current = None;
            return Err(BridgeError::TransportNotConnected);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}
