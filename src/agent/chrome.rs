//! Chrome-backed implementation of the surface traits.
//!
//! Attaches over the DevTools protocol to a user-launched Chrome
//! (`--remote-debugging-port=9222`) that has the chat tab open. All DOM work
//! happens through a small helper object evaluated into the page; the Rust
//! side only calls its functions and deserializes the JSON they return.
//! Text extraction is best-effort by design; the engine's cleaner handles
//! the residual noise.

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::surface::{AutomationSurface, HostRef, Snapshot, SurfaceHost, SurfaceRef};
use crate::error::BridgeError;

/// Page-side helper installed by `reestablish`. Mirrors the composer,
/// send-button, assistant-block, and retry-control heuristics of the chat
/// surface.
const HELPER_SCRIPT: &str = r#"
(() => {
  if (window.__bridge) return true;

  const isVisible = (el) => {
    if (!el) return false;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden') return false;
    if (el.offsetParent === null && style.position !== 'fixed') return false;
    return true;
  };

  const findComposer = () => {
    const sels = [
      'textarea[data-testid="prompt-textarea"]:not([disabled])',
      'textarea[placeholder*="Message"]:not([disabled])',
      'textarea:not([disabled])',
      'div[contenteditable="true"][data-testid*="prompt"]',
      'div[contenteditable="true"][role="textbox"]',
      'div[contenteditable="true"]',
    ];
    for (const sel of sels) {
      const el = document.querySelector(sel);
      if (el && isVisible(el)) {
        return { el, kind: el.tagName.toLowerCase() === 'textarea' ? 'textarea' : 'editable' };
      }
    }
    return null;
  };

  const findSendButton = () =>
    document.querySelector('button[data-testid="send-button"], button[aria-label*="Send"], button[aria-label*="Отправить"]');

  const dispatchInput = (el, data) => {
    try { el.dispatchEvent(new InputEvent('input', { bubbles: true, data, inputType: 'insertFromPaste' })); } catch {}
    el.dispatchEvent(new Event('change', { bubbles: true }));
  };

  const assistantBlocks = () =>
    [...document.querySelectorAll('[data-message-author-role="assistant"]')].filter(isVisible);

  window.__bridge = {
    ping: () => true,

    insert: (text) => {
      const found = findComposer();
      if (!found) return false;
      const { el, kind } = found;
      el.focus();
      if (kind === 'textarea') {
        const setter = Object.getOwnPropertyDescriptor(HTMLTextAreaElement.prototype, 'value')?.set;
        if (setter) setter.call(el, text); else el.value = text;
      } else {
        try { document.execCommand('selectAll', false, null); document.execCommand('delete', false, null); } catch {}
        let ok = false;
        try { ok = document.execCommand('insertText', false, text); } catch {}
        if (!ok) el.textContent = text;
      }
      dispatchInput(el, text);
      return true;
    },

    sendReady: () => {
      const btn = findSendButton();
      return !!btn && !btn.disabled && btn.getAttribute('aria-disabled') !== 'true';
    },

    clickSend: () => {
      const btn = findSendButton();
      if (!btn) return false;
      btn.click();
      return true;
    },

    pressEnter: () => {
      const found = findComposer();
      if (!found) return false;
      const opts = { key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true };
      found.el.dispatchEvent(new KeyboardEvent('keydown', opts));
      found.el.dispatchEvent(new KeyboardEvent('keypress', opts));
      found.el.dispatchEvent(new KeyboardEvent('keyup', opts));
      return true;
    },

    snapshot: () => {
      const blocks = assistantBlocks();
      const last = blocks[blocks.length - 1] || null;
      let text = '';
      if (last) {
        const scope = last.querySelector('.markdown, .prose, [data-testid="assistant-message-content"]') || last;
        text = scope.innerText || scope.textContent || '';
      }
      const generating =
        !!document.querySelector('button[aria-label*="Stop"], button[aria-label*="Останов"]') ||
        !!document.querySelector('[data-testid="stop-button"], [data-testid*="stop"]');
      return { count: blocks.length, text, generating };
    },

    clickRetry: () => {
      const blocks = assistantBlocks();
      const last = blocks[blocks.length - 1] || null;
      if (last) {
        const btn = last.querySelector('button, [role="button"]');
        if (btn && /Повторить|Retry/i.test(btn.textContent || '')) { btn.click(); return true; }
      }
      const retry = [...document.querySelectorAll('button')].find(b => /Повторить|Retry/i.test(b.textContent || ''));
      if (retry) { retry.click(); return true; }
      return false;
    },
  };
  return true;
})()
"#;

/// Host that finds the chat tab in an attached Chrome instance.
pub struct ChromeHost {
    browser: Browser,
    chat_urls: Vec<String>,
    /// Page matched by the most recent `locate`; shared with surfaces.
    active: Arc<Mutex<Option<Page>>>,
}

impl ChromeHost {
    /// Attach to a running Chrome via its DevTools URL.
    pub async fn connect(cdp_url: &str, chat_urls: Vec<String>) -> anyhow::Result<Arc<Self>> {
        let (browser, mut handler) = Browser::connect(cdp_url).await?;
        // The handler must be polled for the connection to make progress.
        tokio::spawn(async move { while handler.next().await.is_some() {} });
        info!(url = %cdp_url, "attached to Chrome");
        Ok(Arc::new(Self {
            browser,
            chat_urls,
            active: Arc::new(Mutex::new(None)),
        }))
    }

    async fn find_chat_page(&self) -> Option<Page> {
        let pages = match self.browser.pages().await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(error = %e, "failed to list pages");
                return None;
            }
        };
        for page in pages {
            if let Ok(Some(url)) = page.url().await {
                if self.chat_urls.iter().any(|prefix| url.starts_with(prefix)) {
                    return Some(page);
                }
            }
        }
        None
    }
}

#[async_trait]
impl SurfaceHost for ChromeHost {
    async fn locate(&self) -> Option<HostRef> {
        let page = self.find_chat_page().await?;
        let url = page.url().await.ok().flatten().unwrap_or_default();
        *self.active.lock().await = Some(page);
        Some(HostRef(url))
    }

    async fn probe(&self, _host: &HostRef) -> bool {
        let guard = self.active.lock().await;
        let Some(page) = guard.as_ref() else {
            return false;
        };
        matches!(
            eval::<bool>(page, "!!(window.__bridge && window.__bridge.ping())").await,
            Ok(true)
        )
    }

    async fn reestablish(&self, host: &HostRef) -> Result<(), BridgeError> {
        let guard = self.active.lock().await;
        let page = guard
            .as_ref()
            .ok_or_else(|| BridgeError::Surface("no active page".to_string()))?;
        debug!(host = %host, "installing page helper");
        eval::<bool>(page, HELPER_SCRIPT).await.map(|_| ())
    }

    fn surface(&self, _host: &HostRef) -> SurfaceRef {
        Arc::new(ChromeSurface {
            active: Arc::clone(&self.active),
        })
    }
}

/// Surface bound to the host's active page.
pub struct ChromeSurface {
    active: Arc<Mutex<Option<Page>>>,
}

impl ChromeSurface {
    async fn page(&self) -> Result<Page, BridgeError> {
        self.active
            .lock()
            .await
            .clone()
            .ok_or_else(|| BridgeError::Surface("no active page".to_string()))
    }

    async fn call<T: DeserializeOwned>(&self, expr: &str) -> Result<T, BridgeError> {
        let page = self.page().await?;
        eval(&page, expr).await
    }
}

#[async_trait]
impl AutomationSurface for ChromeSurface {
    async fn insert_prompt(&self, prompt: &str) -> Result<(), BridgeError> {
        // serde_json turns the prompt into a valid JS string literal.
        let literal = serde_json::to_string(prompt)
            .map_err(|e| BridgeError::Surface(e.to_string()))?;
        let inserted: bool = self
            .call(&format!("window.__bridge.insert({literal})"))
            .await?;
        if inserted {
            Ok(())
        } else {
            Err(BridgeError::InputSurfaceNotFound)
        }
    }

    async fn submit_ready(&self) -> Result<bool, BridgeError> {
        self.call("window.__bridge.sendReady()").await
    }

    async fn trigger_submit(&self) -> Result<(), BridgeError> {
        self.call::<bool>("window.__bridge.clickSend()").await?;
        Ok(())
    }

    async fn confirm_fallback(&self) -> Result<(), BridgeError> {
        self.call::<bool>("window.__bridge.pressEnter()").await?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Snapshot, BridgeError> {
        #[derive(serde::Deserialize)]
        struct RawSnapshot {
            count: usize,
            text: String,
            generating: bool,
        }
        let raw: RawSnapshot = self.call("window.__bridge.snapshot()").await?;
        Ok(Snapshot {
            count: raw.count,
            text: raw.text,
            generating: raw.generating,
        })
    }

    async fn trigger_retry(&self) -> Result<bool, BridgeError> {
        self.call("window.__bridge.clickRetry()").await
    }
}

async fn eval<T: DeserializeOwned>(page: &Page, expr: &str) -> Result<T, BridgeError> {
    let result = page
        .evaluate(expr)
        .await
        .map_err(|e| BridgeError::Surface(e.to_string()))?;
    result
        .into_value::<T>()
        .map_err(|e| BridgeError::Surface(format!("bad evaluation result: {e}")))
}
