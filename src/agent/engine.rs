//! Automation engine: drives one job at a time against an
//! [`AutomationSurface`].
//!
//! The engine is a cooperative polling loop. It inserts the prompt, triggers
//! submission, then samples snapshots at a fixed interval to detect
//! generation start, growth, and completion. Output only ever grows by
//! append while a generation is in flight, so each delta is the suffix of
//! the current text past the previously seen text.
//!
//! A known transient failure leaves an error token in the output block; the
//! engine triggers the surface's retry control a bounded number of times per
//! job and keeps polling. The token (and other UI noise) is stripped from
//! everything the engine emits.

use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::agent::surface::AutomationSurface;
use crate::error::BridgeError;

/// Text signature of the transient in-band generation failure.
const TRANSIENT_ERROR_SIGNATURE: &str = "getNodeByIdOrMessageId";

/// Timing and retry policy for the polling loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between checks for a ready submission control.
    pub submit_poll_interval: Duration,
    /// How long to wait for a ready submission control before falling back.
    pub submit_wait: Duration,
    /// Interval between output snapshots.
    pub poll_interval: Duration,
    /// How long the output must stay unchanged (and not generating) before
    /// the job counts as complete.
    pub quiet_period: Duration,
    /// Pause after triggering a retry before polling resumes.
    pub retry_backoff: Duration,
    /// Transient-error retries available per job.
    pub retry_budget: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submit_poll_interval: Duration::from_millis(60),
            submit_wait: Duration::from_secs(3),
            poll_interval: Duration::from_millis(120),
            quiet_period: Duration::from_millis(900),
            retry_backoff: Duration::from_millis(400),
            retry_budget: 2,
        }
    }
}

/// Strips known noise patterns from surface text.
///
/// Idempotent: cleaning already-clean text is a no-op.
#[derive(Debug)]
pub struct Cleaner {
    error_token: Regex,
    echoed_probe: Regex,
    retry_label: Regex,
}

impl Cleaner {
    pub fn new() -> Self {
        Self {
            error_token: Regex::new(&format!("(?i){TRANSIENT_ERROR_SIGNATURE}")).unwrap(),
            echoed_probe: Regex::new(r"(?i)Ответь одним словом:[^\n]+").unwrap(),
            retry_label: Regex::new(r"\b(?:Повторить|Retry)\b").unwrap(),
        }
    }

    /// Whether `text` carries the transient-error token, case-insensitively
    /// like the cleanup filter.
    pub fn has_error_token(&self, text: &str) -> bool {
        self.error_token.is_match(text)
    }

    /// Remove embedded error tokens, echoed diagnostic prompt lines, and
    /// leftover retry labels.
    pub fn clean(&self, text: &str) -> String {
        let s = self.error_token.replace_all(text, "");
        let s = self.echoed_probe.replace_all(&s, "");
        let s = self.retry_label.replace_all(&s, "");
        s.trim().to_string()
    }
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new()
    }
}

/// One engine instance; active for at most one job at a time.
pub struct AutomationEngine {
    cfg: EngineConfig,
    cleaner: Cleaner,
}

impl AutomationEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            cleaner: Cleaner::new(),
        }
    }

    /// Execute a single job against `surface`.
    ///
    /// Deltas are sent on `deltas` only when `stream` is true. Returns the
    /// accumulated cleaned text; past `timeout` the accumulated text is
    /// returned as a best-effort result rather than an error.
    pub async fn run_job(
        &self,
        surface: &dyn AutomationSurface,
        prompt: &str,
        stream: bool,
        timeout: Duration,
        deltas: &mpsc::UnboundedSender<String>,
    ) -> Result<String, BridgeError> {
        self.submit(surface, prompt).await?;
        self.observe(surface, stream, timeout, deltas).await
    }

    /// Insert the prompt and trigger submission.
    async fn submit(
        &self,
        surface: &dyn AutomationSurface,
        prompt: &str,
    ) -> Result<(), BridgeError> {
        surface.insert_prompt(prompt).await?;

        let deadline = Instant::now() + self.cfg.submit_wait;
        let mut triggered = false;
        while Instant::now() < deadline {
            if surface.submit_ready().await? {
                surface.trigger_submit().await?;
                triggered = true;
                break;
            }
            tokio::time::sleep(self.cfg.submit_poll_interval).await;
        }

        // Secondary trigger if generation has not begun.
        if !surface.snapshot().await?.generating {
            debug!(triggered, "primary submit inconclusive, sending confirm fallback");
            surface.confirm_fallback().await?;
        }
        Ok(())
    }

    /// Poll snapshots until completion, emitting deltas along the way.
    async fn observe(
        &self,
        surface: &dyn AutomationSurface,
        stream: bool,
        timeout: Duration,
        deltas: &mpsc::UnboundedSender<String>,
    ) -> Result<String, BridgeError> {
        let started_at = Instant::now();
        let baseline = surface.snapshot().await?;
        let baseline_text = self.cleaner.clean(&baseline.text);

        let mut prev_text = baseline_text.clone();
        let mut started = false;
        let mut last_change = Instant::now();
        let mut retries_left = self.cfg.retry_budget;

        while started_at.elapsed() < timeout {
            let snap = surface.snapshot().await?;
            let text = self.cleaner.clean(&snap.text);

            if !started {
                if snap.count > baseline.count
                    || text.len() > baseline_text.len()
                    || snap.generating
                {
                    started = true;
                    prev_text = text;
                    last_change = Instant::now();
                    debug!(count = snap.count, "generation started");
                    if stream && !prev_text.is_empty() {
                        let _ = deltas.send(prev_text.clone());
                    }
                }
            } else {
                if text.len() > prev_text.len() {
                    // Append-only growth; the previous text length is a char
                    // boundary unless the surface rewrote earlier output.
                    if let Some(delta) = text.get(prev_text.len()..) {
                        if stream {
                            let _ = deltas.send(delta.to_string());
                        }
                    }
                    prev_text = text;
                    last_change = Instant::now();
                }

                // The signature is detected on the raw snapshot; the cleaner
                // has already stripped it from anything we emit.
                if self.cleaner.has_error_token(&snap.text) && retries_left > 0 {
                    if surface.trigger_retry().await? {
                        retries_left -= 1;
                        debug!(retries_left, "transient error signature, retried");
                        tokio::time::sleep(self.cfg.retry_backoff).await;
                        continue;
                    }
                }

                if !snap.generating && last_change.elapsed() > self.cfg.quiet_period {
                    return Ok(prev_text);
                }
            }

            tokio::time::sleep(self.cfg.poll_interval).await;
        }

        warn!(
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "job timed out, returning accumulated text"
        );
        Ok(prev_text)
    }
}
