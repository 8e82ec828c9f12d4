//! chatbridge: local Ollama/OpenAI-style HTTP APIs backed by a
//! browser-automated chat tab.
//!
//! Two processes share this crate:
//!
//! - the **server** (`chatbridge-server`) exposes the HTTP facade and owns
//!   the single WebSocket transport to the agent ([`relay`], [`api`]);
//! - the **agent** (`chatbridge-agent`) connects to the server, serializes
//!   jobs through a FIFO queue, and drives the chat tab over the DevTools
//!   protocol ([`agent`]).

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
