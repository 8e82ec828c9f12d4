//! Request shapes for the public HTTP surface.
//!
//! Two dialects share one backend: Ollama-style (`/api/generate`,
//! `/api/chat`) and OpenAI-style (`/v1/chat/completions`). Response bodies
//! are assembled ad hoc with `serde_json::json!` in the route handlers; only
//! the inbound shapes need types.

use serde::Deserialize;

fn default_true() -> bool {
    true
}

/// Body of `POST /api/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
    /// Non-standard fallback accepted for convenience.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// OpenAI defaults to buffered responses.
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content is either a plain string or structured parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
}

/// Prompt of the most recent `user`-role message, structured parts joined
/// with newlines. Empty result means "no extractable prompt".
pub fn extract_prompt(messages: &[ChatMessage]) -> String {
    let last_user = messages.iter().rev().find(|m| m.role == "user");
    match last_user {
        Some(msg) => match &msg.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        },
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: MessageContent) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content,
        }
    }

    #[test]
    fn extracts_most_recent_user_message() {
        let messages = vec![
            msg("user", MessageContent::Text("first".into())),
            msg("assistant", MessageContent::Text("reply".into())),
            msg("user", MessageContent::Text("second".into())),
        ];
        assert_eq!(extract_prompt(&messages), "second");
    }

    #[test]
    fn joins_structured_parts_with_newlines() {
        let messages = vec![msg(
            "user",
            MessageContent::Parts(vec![
                ContentPart {
                    text: Some("line one".into()),
                },
                ContentPart { text: None },
                ContentPart {
                    text: Some("line two".into()),
                },
            ]),
        )];
        assert_eq!(extract_prompt(&messages), "line one\nline two");
    }

    #[test]
    fn no_user_message_yields_empty_prompt() {
        let messages = vec![msg("system", MessageContent::Text("be brief".into()))];
        assert_eq!(extract_prompt(&messages), "");
        assert_eq!(extract_prompt(&[]), "");
    }

    #[test]
    fn openai_request_defaults_to_buffered() {
        let req: ChatCompletionRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert!(!req.stream);
        let req: GenerateRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert!(req.stream);
    }
}
