//! chatbridge-agent: connects the job queue and automation engine to the
//! relay server on one side and a DevTools-attached Chrome on the other.
//!
//! Expects Chrome to be running with `--remote-debugging-port` and the chat
//! tab open; the tab is located by URL prefix.

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatbridge::agent::chrome::ChromeHost;
use chatbridge::agent::{client, AutomationEngine, EngineConfig, HostHandle, JobQueue};
use chatbridge::config::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env();
    info!(server = %config.server_url, cdp = %config.cdp_url, "agent starting");

    let host: HostHandle =
        ChromeHost::connect(&config.cdp_url, config.chat_urls.clone()).await?;
    let engine = AutomationEngine::new(EngineConfig::default());
    let (queue, events) = JobQueue::spawn(host, engine, config.settle_delay);

    client::run(config, queue, events).await;
    Ok(())
}
