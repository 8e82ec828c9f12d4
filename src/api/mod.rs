//! HTTP API facade.
//!
//! ## Endpoints
//!
//! - `POST /api/generate` - Ollama-style generation (NDJSON when streaming)
//! - `POST /api/chat` - Ollama-style chat, delegates to generate semantics
//! - `GET /v1/models` - static single-model listing
//! - `POST /v1/chat/completions` - OpenAI-compatible (SSE when streaming)
//! - `GET /healthz` - transport connectivity + pending job count

mod routes;
pub mod types;

pub use routes::{router, AppState};
