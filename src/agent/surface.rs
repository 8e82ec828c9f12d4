//! Seam between the automation engine and whatever actually hosts the chat
//! surface.
//!
//! The engine never touches a DOM or a DevTools connection; it only consumes
//! point-in-time [`Snapshot`]s and triggers abstract controls. All timing and
//! interval policy lives in the engine, not here.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BridgeError;

/// Point-in-time read of the surface's observable output state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Number of assistant output blocks currently rendered.
    pub count: usize,
    /// Extracted text of the latest output block.
    pub text: String,
    /// Whether a busy/generating indicator is visible.
    pub generating: bool,
}

/// The external interactive surface a job is executed against.
///
/// # Invariants
/// - `snapshot()` is read-only and may be called at any cadence.
/// - Output text only grows by append while a generation is in flight;
///   the engine computes deltas under that assumption.
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    /// Insert `prompt` into the input surface.
    ///
    /// Fails with [`BridgeError::InputSurfaceNotFound`] when no eligible
    /// input control exists.
    async fn insert_prompt(&self, prompt: &str) -> Result<(), BridgeError>;

    /// Whether a submission control is present and enabled right now.
    async fn submit_ready(&self) -> Result<bool, BridgeError>;

    /// Trigger the primary submission control.
    async fn trigger_submit(&self) -> Result<(), BridgeError>;

    /// Secondary submission trigger (simulated confirm action).
    async fn confirm_fallback(&self) -> Result<(), BridgeError>;

    /// Read the current output state.
    async fn snapshot(&self) -> Result<Snapshot, BridgeError>;

    /// Locate and trigger a nearby retry control. Returns whether one was
    /// actually triggered.
    async fn trigger_retry(&self) -> Result<bool, BridgeError>;
}

/// Shared surface handle.
pub type SurfaceRef = Arc<dyn AutomationSurface>;

/// Opaque reference to the host context a surface lives in (e.g. a tab id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRef(pub String);

impl std::fmt::Display for HostRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Discovery and liveness management for the automation surface's host.
///
/// The queue drives this before every dispatch: locate, probe, and at most
/// one re-establishment when the probe fails.
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    /// Find an eligible host context, if any.
    async fn locate(&self) -> Option<HostRef>;

    /// Probe whether the surface inside `host` is alive and answering.
    async fn probe(&self, host: &HostRef) -> bool;

    /// Re-establish the surface inside `host` (re-injection equivalent).
    async fn reestablish(&self, host: &HostRef) -> Result<(), BridgeError>;

    /// Surface handle bound to `host`.
    fn surface(&self, host: &HostRef) -> SurfaceRef;
}

pub type HostHandle = Arc<dyn SurfaceHost>;
