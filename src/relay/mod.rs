//! Relay server: owns the agent transport and the table of pending jobs.
//!
//! Submission registers a PendingEntry keyed by a fresh job id and pushes a
//! `job` frame over the transport; inbound lifecycle frames are
//! demultiplexed back to the entry by id. Each entry is removed exactly once,
//! on its terminal event. Events for unknown ids are dropped silently.

mod transport;
pub mod ws;

pub use transport::{Transport, TransportSender};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::protocol::{Job, WireMessage};

/// Cadence of the transport liveness nudge.
const NUDGE_INTERVAL: Duration = Duration::from_secs(60);

/// Per-job event delivered to the submitting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Delta(String),
    Done(String),
    Error(BridgeError),
}

struct PendingEntry {
    events: mpsc::UnboundedSender<JobEvent>,
    created_at: DateTime<Utc>,
}

pub struct RelayServer {
    transport: Transport,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl RelayServer {
    pub fn new() -> Arc<Self> {
        let relay = Arc::new(Self {
            transport: Transport::new(),
            pending: Mutex::new(HashMap::new()),
        });
        relay.clone().spawn_nudge();
        relay
    }

    /// Submit a job to the agent.
    ///
    /// Returns the job id and the stream of its events, ending with exactly
    /// one terminal [`JobEvent::Done`] or [`JobEvent::Error`]. Fails
    /// synchronously with [`BridgeError::TransportNotConnected`] when no
    /// agent is connected; no entry is left behind in that case.
    pub fn submit(
        &self,
        prompt: String,
        stream: bool,
        timeout: Duration,
    ) -> Result<(String, mpsc::UnboundedReceiver<JobEvent>), BridgeError> {
        let id = new_job_id();
        let (tx, rx) = mpsc::unbounded_channel();

        self.pending.lock().unwrap().insert(
            id.clone(),
            PendingEntry {
                events: tx,
                created_at: Utc::now(),
            },
        );

        let frame = WireMessage::Job(Job {
            id: id.clone(),
            prompt,
            stream,
            timeout_ms: timeout.as_millis() as u64,
        });
        if let Err(e) = self.transport.send(frame) {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        info!(id = %id, stream, "job submitted");
        Ok((id, rx))
    }

    /// Demultiplex one inbound frame from the agent.
    pub fn handle_message(&self, msg: WireMessage) {
        match msg {
            WireMessage::Delta { id, delta } => {
                self.forward(&id, JobEvent::Delta(delta), false);
            }
            WireMessage::Done { id, text } => {
                self.forward(&id, JobEvent::Done(text), true);
            }
            WireMessage::JobError { id, error, detail } => {
                let err = BridgeError::from_wire(&error, detail.as_deref());
                self.forward(&id, JobEvent::Error(err), true);
            }
            WireMessage::JobStarted { id, host_ref } => {
                debug!(id = %id, host = %host_ref, "job started on agent");
            }
            WireMessage::Hello { from, version } => {
                info!(%from, %version, "agent hello");
            }
            WireMessage::Ping => {
                let _ = self.transport.send(WireMessage::Pong);
            }
            WireMessage::Pong => {}
            other => {
                debug!(kind = other.kind(), "unexpected frame from agent");
            }
        }
    }

    /// Deliver an event to the pending entry for `id`. Terminal events remove
    /// the entry; a dropped caller (closed receiver) removes it as well, so
    /// it can never be resolved twice.
    fn forward(&self, id: &str, event: JobEvent, terminal: bool) {
        let mut pending = self.pending.lock().unwrap();
        if terminal {
            match pending.remove(id) {
                Some(entry) => {
                    let waited = Utc::now() - entry.created_at;
                    debug!(id, waited_ms = waited.num_milliseconds(), "job resolved");
                    let _ = entry.events.send(event);
                }
                None => debug!(id, "terminal event for unknown job dropped"),
            }
        } else {
            match pending.get(id) {
                Some(entry) => {
                    if entry.events.send(event).is_err() {
                        // Caller went away mid-stream; stop tracking the job.
                        pending.remove(id);
                        warn!(id, "caller gone, pending entry discarded");
                    }
                }
                None => debug!(id, "event for unknown job dropped"),
            }
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Periodic liveness nudge: pings the agent so a dead transport is
    /// detected and cleared between jobs.
    fn spawn_nudge(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(NUDGE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.transport.send(WireMessage::Ping).is_err() {
                    debug!("liveness nudge: no agent connected");
                }
            }
        });
    }
}

fn new_job_id() -> String {
    format!("job_{}", Uuid::new_v4().simple())
}
