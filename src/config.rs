//! Process configuration, read once at startup from the environment.
//!
//! Components take their configuration through constructors; nothing in the
//! crate consults the environment after `from_env` returns.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the relay/API server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address for the public HTTP API.
    pub http_addr: SocketAddr,
    /// Address for the agent WebSocket listener (path `/bridge`).
    pub ws_addr: SocketAddr,
    /// Model id reported by the API surface.
    pub model: String,
    /// Per-job timeout applied when the caller does not set one.
    pub default_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([127, 0, 0, 1], 11434).into(),
            ws_addr: ([127, 0, 0, 1], 11435).into(),
            model: "chatgpt-web".to_string(),
            default_timeout: Duration::from_millis(180_000),
        }
    }
}

impl ServerConfig {
    /// Build from `PORT`, `WS_PORT`, `BRIDGE_MODEL`, `BRIDGE_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(port) = env_parse::<u16>("PORT") {
            cfg.http_addr.set_port(port);
        }
        if let Some(port) = env_parse::<u16>("WS_PORT") {
            cfg.ws_addr.set_port(port);
        }
        if let Ok(model) = std::env::var("BRIDGE_MODEL") {
            if !model.is_empty() {
                cfg.model = model;
            }
        }
        if let Some(ms) = env_parse::<u64>("BRIDGE_TIMEOUT_MS") {
            cfg.default_timeout = Duration::from_millis(ms);
        }
        cfg
    }
}

/// Configuration for the automation agent binary.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// WebSocket URL of the relay server.
    pub server_url: String,
    /// DevTools URL of the Chrome instance hosting the chat tab.
    pub cdp_url: String,
    /// URL prefixes that identify an eligible chat tab.
    pub chat_urls: Vec<String>,
    /// Delay between reconnection attempts after a dropped transport.
    pub reconnect_delay: Duration,
    /// Settle delay between surface re-establishment and the re-probe.
    pub settle_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:11435/bridge".to_string(),
            cdp_url: "http://127.0.0.1:9222".to_string(),
            chat_urls: vec![
                "https://chatgpt.com/".to_string(),
                "https://chat.openai.com/".to_string(),
            ],
            reconnect_delay: Duration::from_millis(1_200),
            settle_delay: Duration::from_millis(200),
        }
    }
}

impl AgentConfig {
    /// Build from `BRIDGE_WS_URL` and `CDP_URL`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("BRIDGE_WS_URL") {
            if !url.is_empty() {
                cfg.server_url = url;
            }
        }
        if let Ok(url) = std::env::var("CDP_URL") {
            if !url.is_empty() {
                cfg.cdp_url = url;
            }
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bridge_ports() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_addr.port(), 11434);
        assert_eq!(cfg.ws_addr.port(), 11435);
        assert_eq!(cfg.model, "chatgpt-web");
    }
}
