//! Route handlers for the public HTTP surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, Method, StatusCode, Uri};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use super::types::{extract_prompt, ChatCompletionRequest, ChatRequest, GenerateRequest};
use crate::config::ServerConfig;
use crate::error::BridgeError;
use crate::relay::{JobEvent, RelayServer};

const BRIDGE_HEADER: HeaderName = HeaderName::from_static("x-bridge");

/// Shared state for all HTTP handlers.
pub struct AppState {
    pub relay: Arc<RelayServer>,
    pub config: ServerConfig,
}

/// Router for the public API listener.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/chat", post(chat))
        .route("/v1/models", get(models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/healthz", get(healthz))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Which error-body dialect a route speaks.
#[derive(Clone, Copy)]
enum Dialect {
    Ollama,
    OpenAi,
}

fn error_body(dialect: Dialect, message: &str) -> serde_json::Value {
    match dialect {
        Dialect::Ollama => json!({ "error": message }),
        Dialect::OpenAi => json!({ "error": { "message": message } }),
    }
}

fn bridge_error(dialect: Dialect, err: &BridgeError) -> Response {
    let status = match err {
        BridgeError::TransportNotConnected => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(%err, "request failed");
    (status, Json(error_body(dialect, &err.to_string()))).into_response()
}

fn bad_request(dialect: Dialect, message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(error_body(dialect, message))).into_response()
}

/// Drain a job's events until its terminal event.
async fn await_result(mut rx: mpsc::UnboundedReceiver<JobEvent>) -> Result<String, BridgeError> {
    while let Some(event) = rx.recv().await {
        match event {
            JobEvent::Delta(_) => {}
            JobEvent::Done(text) => return Ok(text),
            JobEvent::Error(err) => return Err(err),
        }
    }
    // Channel closed without a terminal event (server shutting down).
    Err(BridgeError::Remote("job abandoned".to_string()))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let model = req.model.unwrap_or_else(|| state.config.model.clone());
    if req.prompt.trim().is_empty() {
        return bad_request(Dialect::Ollama, "No prompt");
    }
    respond_generate(&state, model, req.prompt, req.stream).await
}

async fn chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    let model = req.model.unwrap_or_else(|| state.config.model.clone());
    let mut prompt = extract_prompt(&req.messages);
    if prompt.is_empty() {
        prompt = req.prompt.unwrap_or_default();
    }
    if prompt.trim().is_empty() {
        return bad_request(Dialect::Ollama, "No prompt");
    }
    respond_generate(&state, model, prompt, req.stream).await
}

/// Shared generate semantics: buffered JSON or NDJSON stream.
async fn respond_generate(
    state: &AppState,
    model: String,
    prompt: String,
    stream: bool,
) -> Response {
    let timeout = state.config.default_timeout;

    if !stream {
        let (_id, rx) = match state.relay.submit(prompt, false, timeout) {
            Ok(pair) => pair,
            Err(e) => return bridge_error(Dialect::Ollama, &e),
        };
        return match await_result(rx).await {
            Ok(full) => (
                [(BRIDGE_HEADER, state.config.model.as_str())],
                Json(json!({
                    "model": model,
                    "created_at": Utc::now().to_rfc3339(),
                    "response": full,
                    "done": true,
                    "total_duration": 0,
                    "eval_count": full.len(),
                })),
            )
                .into_response(),
            Err(e) => bridge_error(Dialect::Ollama, &e),
        };
    }

    let (_id, mut rx) = match state.relay.submit(prompt, true, timeout) {
        Ok(pair) => pair,
        Err(e) => return bridge_error(Dialect::Ollama, &e),
    };

    let bridge_tag = state.config.model.clone();
    let body = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match event {
                JobEvent::Delta(delta) => {
                    yield Ok::<String, Infallible>(ndjson_line(json!({
                        "model": model,
                        "created_at": Utc::now().to_rfc3339(),
                        "response": delta,
                        "done": false,
                    })));
                }
                JobEvent::Done(full) => {
                    yield Ok(ndjson_line(json!({
                        "model": model,
                        "created_at": Utc::now().to_rfc3339(),
                        "response": "",
                        "done": true,
                        "total_duration": 0,
                        "eval_count": full.len(),
                    })));
                    break;
                }
                JobEvent::Error(err) => {
                    // Mid-stream failure: one abrupt error line, then EOF.
                    yield Ok(ndjson_line(json!({ "error": err.to_string() })));
                    break;
                }
            }
        }
    };

    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson".to_string()),
            (BRIDGE_HEADER, bridge_tag),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

fn ndjson_line(value: serde_json::Value) -> String {
    let mut line = value.to_string();
    line.push('\n');
    line
}

async fn models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "data": [{ "id": state.config.model, "object": "model", "owned_by": "local" }]
    }))
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    let model = req.model.unwrap_or_else(|| state.config.model.clone());
    let prompt = extract_prompt(&req.messages);
    if prompt.trim().is_empty() {
        return bad_request(Dialect::OpenAi, "No user message");
    }
    let timeout = state.config.default_timeout;

    if !req.stream {
        let (id, rx) = match state.relay.submit(prompt, false, timeout) {
            Ok(pair) => pair,
            Err(e) => return bridge_error(Dialect::OpenAi, &e),
        };
        return match await_result(rx).await {
            Ok(full) => Json(json!({
                "id": id,
                "object": "chat.completion",
                "created": Utc::now().timestamp(),
                "model": model,
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": full },
                    "finish_reason": "stop",
                }],
            }))
            .into_response(),
            Err(e) => bridge_error(Dialect::OpenAi, &e),
        };
    }

    let (id, mut rx) = match state.relay.submit(prompt, true, timeout) {
        Ok(pair) => pair,
        Err(e) => return bridge_error(Dialect::OpenAi, &e),
    };

    let frames = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match event {
                JobEvent::Delta(delta) => {
                    let chunk = json!({
                        "id": id,
                        "object": "chat.completion.chunk",
                        "created": Utc::now().timestamp(),
                        "model": model,
                        "choices": [{
                            "index": 0,
                            "delta": { "role": "assistant", "content": delta },
                            "finish_reason": null,
                        }],
                    });
                    yield Ok::<Event, Infallible>(Event::default().data(chunk.to_string()));
                }
                JobEvent::Done(_) => {
                    yield Ok(Event::default().data("[DONE]"));
                    break;
                }
                JobEvent::Error(err) => {
                    let frame = json!({ "error": { "message": err.to_string() } });
                    yield Ok(Event::default().data(frame.to_string()));
                    break;
                }
            }
        }
    };

    Sse::new(frames).into_response()
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "extension_connected": state.relay.is_connected(),
        "pending_jobs": state.relay.pending_count(),
        "now": Utc::now().to_rfc3339(),
    }))
}

async fn not_found(method: Method, uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Cannot {method} {uri}") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let state = Arc::new(AppState {
            relay: RelayServer::new(),
            config: ServerConfig::default(),
        });
        router(state)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_disconnected_transport() {
        let app = test_router();
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["extension_connected"], false);
        assert_eq!(body["pending_jobs"], 0);
        assert!(body["now"].is_string());
    }

    #[tokio::test]
    async fn unmatched_route_is_a_json_404() {
        let app = test_router();
        let response = app
            .oneshot(Request::builder().uri("/api/tags").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Cannot GET /api/tags");
    }

    #[tokio::test]
    async fn models_lists_the_configured_model() {
        let app = test_router();
        let response = app
            .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"][0]["id"], "chatgpt-web");
        assert_eq!(body["data"][0]["object"], "model");
    }

    #[tokio::test]
    async fn generate_without_prompt_is_rejected_before_submission() {
        let app = test_router();
        let response = app
            .oneshot(post_json("/api/generate", json!({ "stream": false })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "No prompt");
    }

    #[tokio::test]
    async fn chat_without_user_message_is_rejected() {
        let app = test_router();
        let response = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "messages": [{ "role": "system", "content": "x" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_completions_without_user_message_uses_openai_error_shape() {
        let app = test_router();
        let response = app
            .oneshot(post_json("/v1/chat/completions", json!({ "messages": [] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "No user message");
    }

    #[tokio::test]
    async fn disconnected_transport_rejects_immediately_with_no_pending_entry() {
        let state = Arc::new(AppState {
            relay: RelayServer::new(),
            config: ServerConfig::default(),
        });
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(post_json(
                "/api/generate",
                json!({ "prompt": "ping", "stream": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "no automation agent connected");
        assert_eq!(state.relay.pending_count(), 0);
    }
}
