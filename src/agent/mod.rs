//! The automation agent: everything that runs next to the browser.
//!
//! # Components
//! - **engine**: drives one job against the chat surface (poll loop)
//! - **queue**: FIFO backlog with a single active slot
//! - **surface**: traits decoupling the engine from how the surface is sampled
//! - **chrome**: CDP-backed surface implementation
//! - **client**: WebSocket session with the relay server

pub mod chrome;
pub mod client;
pub mod engine;
pub mod queue;
pub mod surface;

pub use engine::{AutomationEngine, Cleaner, EngineConfig};
pub use queue::{JobQueue, QueueEvent, QueueHandle, QueueStatus};
pub use surface::{AutomationSurface, HostHandle, HostRef, Snapshot, SurfaceHost, SurfaceRef};
