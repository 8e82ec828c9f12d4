//! Wire protocol for the server↔agent duplex channel.
//!
//! Messages are JSON text frames discriminated by a `type` field. Field names
//! are camelCase on the wire so the frames stay compatible with the original
//! browser-extension agent.

use serde::{Deserialize, Serialize};

/// A job relayed to the agent for execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
}

/// One frame on the duplex channel, either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Agent announces itself after (re)connecting. Acked/logged only.
    #[serde(rename = "hello")]
    Hello {
        from: String,
        version: String,
    },

    /// Liveness probe, either direction.
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,

    /// Server instructs the agent to adopt a new transport URL.
    #[serde(rename = "configure")]
    Configure {
        #[serde(rename = "wsUrl")]
        ws_url: String,
    },

    /// Server dispatches a job to the agent.
    #[serde(rename = "job")]
    Job(Job),

    /// Agent accepted a job and began driving the surface.
    #[serde(rename = "jobStarted")]
    JobStarted {
        id: String,
        #[serde(rename = "hostRef")]
        host_ref: String,
    },

    /// Incremental output growth for a streaming job.
    #[serde(rename = "delta")]
    Delta {
        id: String,
        delta: String,
    },

    /// Terminal success: the full (cleaned) output text.
    #[serde(rename = "done")]
    Done {
        id: String,
        text: String,
    },

    /// Terminal failure for a job.
    #[serde(rename = "jobError")]
    JobError {
        id: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl WireMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Configure { .. } => "configure",
            Self::Job(_) => "job",
            Self::JobStarted { .. } => "jobStarted",
            Self::Delta { .. } => "delta",
            Self::Done { .. } => "done",
            Self::JobError { .. } => "jobError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_frame_uses_camel_case() {
        let msg = WireMessage::Job(Job {
            id: "job_1".into(),
            prompt: "hi".into(),
            stream: true,
            timeout_ms: 180_000,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "job");
        assert_eq!(json["timeoutMs"], 180_000);
        assert!(json.get("timeout_ms").is_none());
    }

    #[test]
    fn job_error_detail_is_optional() {
        let json = r#"{"type":"jobError","id":"j","error":"TARGET_NOT_FOUND"}"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            WireMessage::JobError {
                id: "j".into(),
                error: "TARGET_NOT_FOUND".into(),
                detail: None,
            }
        );
        // No detail key serialized when absent.
        let back = serde_json::to_string(&msg).unwrap();
        assert!(!back.contains("detail"));
    }

    #[test]
    fn extension_style_frames_parse() {
        let hello = r#"{"type":"hello","from":"extension","version":"0.3.4"}"#;
        assert_eq!(
            serde_json::from_str::<WireMessage>(hello).unwrap().kind(),
            "hello"
        );
        let delta = r#"{"type":"delta","id":"job_x","delta":"Hel"}"#;
        assert_eq!(
            serde_json::from_str::<WireMessage>(delta).unwrap().kind(),
            "delta"
        );
    }
}
