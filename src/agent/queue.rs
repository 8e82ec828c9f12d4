//! Agent-side job queue: FIFO backlog drained by one sequential worker.
//!
//! Exactly one job occupies the active slot at a time; the automation engine
//! is only ever invoked from the single worker task, so queue and slot state
//! never see concurrent mutation. Before each dispatch the worker verifies
//! the host context exists and that the surface answers a liveness probe,
//! re-establishing it at most once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::agent::engine::AutomationEngine;
use crate::agent::surface::{HostHandle, HostRef, SurfaceRef};
use crate::error::BridgeError;
use crate::protocol::Job;

/// Lifecycle events reported upstream to the relay.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Started { id: String, host_ref: String },
    Delta { id: String, delta: String },
    Done { id: String, text: String },
    Error { id: String, error: BridgeError },
}

/// Diagnostic snapshot for out-of-scope status consumers.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub host_located: bool,
    pub surface_alive: bool,
    pub active_job: Option<String>,
    pub backlog: usize,
}

/// Handle to a running queue worker.
#[derive(Clone)]
pub struct QueueHandle {
    jobs: mpsc::UnboundedSender<Job>,
    host: HostHandle,
    settle_delay: Duration,
    current: Arc<RwLock<Option<String>>>,
    backlog: Arc<std::sync::atomic::AtomicUsize>,
}

/// The queue worker plus its handle.
pub struct JobQueue;

impl JobQueue {
    /// Spawn the worker task. Returns the handle used to enqueue jobs and
    /// the stream of lifecycle events.
    pub fn spawn(
        host: HostHandle,
        engine: AutomationEngine,
        settle_delay: Duration,
    ) -> (QueueHandle, mpsc::UnboundedReceiver<QueueEvent>) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let current = Arc::new(RwLock::new(None));
        let backlog = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handle = QueueHandle {
            jobs: jobs_tx,
            host: Arc::clone(&host),
            settle_delay,
            current: Arc::clone(&current),
            backlog: Arc::clone(&backlog),
        };

        tokio::spawn(worker(
            host,
            engine,
            settle_delay,
            jobs_rx,
            events_tx,
            current,
            Arc::clone(&backlog),
        ));

        (handle, events_rx)
    }
}

impl QueueHandle {
    /// Add a job to the backlog. It is dispatched once the slot frees up.
    pub fn enqueue(&self, job: Job) {
        self.backlog
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        debug!(id = %job.id, "job enqueued");
        // Worker task only stops when the handle side is dropped.
        let _ = self.jobs.send(job);
    }

    /// Diagnostic status for the popup-style collaborator.
    pub async fn status(&self) -> QueueStatus {
        let host = self.host.locate().await;
        let surface_alive = match &host {
            Some(h) => self.host.probe(h).await,
            None => false,
        };
        QueueStatus {
            host_located: host.is_some(),
            surface_alive,
            active_job: self.current.read().await.clone(),
            backlog: self.backlog.load(std::sync::atomic::Ordering::SeqCst),
        }
    }

    /// Fire a diagnostic prompt at the surface without tracking a job.
    pub async fn test_prompt(&self, prompt: &str) -> Result<(), BridgeError> {
        let (_, surface) = acquire(&self.host, self.settle_delay).await?;
        surface.insert_prompt(prompt).await?;
        if surface.submit_ready().await? {
            surface.trigger_submit().await
        } else {
            surface.confirm_fallback().await
        }
    }
}

/// Locate the host and make sure its surface answers, re-establishing at
/// most once. An already-live surface is never re-established.
async fn acquire(
    host: &HostHandle,
    settle_delay: Duration,
) -> Result<(HostRef, SurfaceRef), BridgeError> {
    let href = host.locate().await.ok_or(BridgeError::TargetNotFound)?;

    if !host.probe(&href).await {
        info!(host = %href, "surface not answering, re-establishing");
        host.reestablish(&href)
            .await
            .map_err(|e| BridgeError::InjectionFailed(e.to_string()))?;
        tokio::time::sleep(settle_delay).await;
        if !host.probe(&href).await {
            return Err(BridgeError::InjectionFailed(
                "surface not answering after re-establishment".to_string(),
            ));
        }
    }

    let surface = host.surface(&href);
    Ok((href, surface))
}

/// Sequential worker: drains the backlog one job at a time.
async fn worker(
    host: HostHandle,
    engine: AutomationEngine,
    settle_delay: Duration,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    events: mpsc::UnboundedSender<QueueEvent>,
    current: Arc<RwLock<Option<String>>>,
    backlog: Arc<std::sync::atomic::AtomicUsize>,
) {
    while let Some(job) = jobs.recv().await {
        backlog.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        *current.write().await = Some(job.id.clone());

        dispatch(&host, &engine, settle_delay, job, &events).await;

        // Slot cleared; the next recv() picks up the next queued job.
        *current.write().await = None;
    }
    debug!("job channel closed, queue worker exiting");
}

/// Run one job end to end, reporting lifecycle events upstream.
async fn dispatch(
    host: &HostHandle,
    engine: &AutomationEngine,
    settle_delay: Duration,
    job: Job,
    events: &mpsc::UnboundedSender<QueueEvent>,
) {
    let (href, surface) = match acquire(host, settle_delay).await {
        Ok(pair) => pair,
        Err(error) => {
            warn!(id = %job.id, %error, "job failed before dispatch");
            let _ = events.send(QueueEvent::Error { id: job.id, error });
            return;
        }
    };

    let _ = events.send(QueueEvent::Started {
        id: job.id.clone(),
        host_ref: href.to_string(),
    });

    // Forward engine deltas upstream as they arrive.
    let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
    let forward_events = events.clone();
    let forward_id = job.id.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(delta) = delta_rx.recv().await {
            let _ = forward_events.send(QueueEvent::Delta {
                id: forward_id.clone(),
                delta,
            });
        }
    });

    let timeout = Duration::from_millis(job.timeout_ms);
    let result = engine
        .run_job(surface.as_ref(), &job.prompt, job.stream, timeout, &delta_tx)
        .await;
    drop(delta_tx);
    let _ = forwarder.await;

    match result {
        Ok(text) => {
            info!(id = %job.id, chars = text.len(), "job done");
            let _ = events.send(QueueEvent::Done { id: job.id, text });
        }
        Err(error) => {
            warn!(id = %job.id, %error, "job failed");
            let _ = events.send(QueueEvent::Error { id: job.id, error });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::engine::EngineConfig;
    use crate::agent::surface::{AutomationSurface, Snapshot, SurfaceHost};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Surface that replays a minimal successful generation: empty baseline,
    /// one generating tick carrying the reply, then settled output.
    struct CannedSurface {
        reply: String,
        ticks: AtomicU32,
    }

    #[async_trait]
    impl AutomationSurface for CannedSurface {
        async fn insert_prompt(&self, _prompt: &str) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn submit_ready(&self) -> Result<bool, BridgeError> {
            Ok(true)
        }
        async fn trigger_submit(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn confirm_fallback(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn snapshot(&self) -> Result<Snapshot, BridgeError> {
            // Tick 0 is the post-submit check, tick 1 the baseline.
            match self.ticks.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Ok(Snapshot::default()),
                2 => Ok(Snapshot {
                    count: 1,
                    text: self.reply.clone(),
                    generating: true,
                }),
                _ => Ok(Snapshot {
                    count: 1,
                    text: self.reply.clone(),
                    generating: false,
                }),
            }
        }
        async fn trigger_retry(&self) -> Result<bool, BridgeError> {
            Ok(false)
        }
    }

    struct TestHost {
        located: bool,
        alive: AtomicBool,
        reinject_ok: bool,
        reinjections: AtomicU32,
        probes: AtomicU32,
        reply: String,
    }

    impl TestHost {
        fn new(reply: &str) -> Self {
            Self {
                located: true,
                alive: AtomicBool::new(true),
                reinject_ok: true,
                reinjections: AtomicU32::new(0),
                probes: AtomicU32::new(0),
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl SurfaceHost for TestHost {
        async fn locate(&self) -> Option<HostRef> {
            self.located.then(|| HostRef("tab-1".to_string()))
        }
        async fn probe(&self, _host: &HostRef) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.alive.load(Ordering::SeqCst)
        }
        async fn reestablish(&self, _host: &HostRef) -> Result<(), BridgeError> {
            self.reinjections.fetch_add(1, Ordering::SeqCst);
            if self.reinject_ok {
                self.alive.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(BridgeError::Surface("inject refused".to_string()))
            }
        }
        fn surface(&self, _host: &HostRef) -> SurfaceRef {
            Arc::new(CannedSurface {
                reply: self.reply.clone(),
                ticks: AtomicU32::new(0),
            })
        }
    }

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            prompt: "hi".to_string(),
            stream: false,
            timeout_ms: 30_000,
        }
    }

    fn fast_engine() -> AutomationEngine {
        AutomationEngine::new(EngineConfig::default())
    }

    async fn next_terminal(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> QueueEvent {
        loop {
            match rx.recv().await.expect("queue event stream ended") {
                QueueEvent::Started { .. } | QueueEvent::Delta { .. } => continue,
                terminal => return terminal,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_dispatch_in_fifo_order_one_at_a_time() {
        let host: HostHandle = Arc::new(TestHost::new("ok"));
        let (handle, mut events) = JobQueue::spawn(host, fast_engine(), Duration::from_millis(200));

        handle.enqueue(job("a"));
        handle.enqueue(job("b"));
        handle.enqueue(job("c"));

        let mut order = Vec::new();
        let mut open = None;
        while order.len() < 3 {
            match events.recv().await.unwrap() {
                QueueEvent::Started { id, .. } => {
                    // A new job may only start once the previous finished.
                    assert_eq!(open, None, "job started while another was active");
                    open = Some(id);
                }
                QueueEvent::Done { id, .. } => {
                    assert_eq!(open.take(), Some(id.clone()));
                    order.push(id);
                }
                QueueEvent::Delta { .. } => {}
                QueueEvent::Error { id, error } => panic!("job {id} failed: {error}"),
            }
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_host_fails_job_and_advances() {
        let mut host = TestHost::new("ok");
        host.located = false;
        let host: HostHandle = Arc::new(host);
        let (handle, mut events) = JobQueue::spawn(host, fast_engine(), Duration::from_millis(200));

        handle.enqueue(job("a"));
        handle.enqueue(job("b"));

        for expected in ["a", "b"] {
            match next_terminal(&mut events).await {
                QueueEvent::Error { id, error } => {
                    assert_eq!(id, expected);
                    assert_eq!(error, BridgeError::TargetNotFound);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dead_surface_is_reestablished_once() {
        let host = TestHost::new("ok");
        host.alive.store(false, Ordering::SeqCst);
        let host = Arc::new(host);
        let handle_host: HostHandle = Arc::clone(&host) as HostHandle;
        let (handle, mut events) =
            JobQueue::spawn(handle_host, fast_engine(), Duration::from_millis(200));

        handle.enqueue(job("a"));
        match next_terminal(&mut events).await {
            QueueEvent::Done { id, text } => {
                assert_eq!(id, "a");
                assert_eq!(text, "ok");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(host.reinjections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reestablishment_is_injection_failed() {
        let mut host = TestHost::new("ok");
        host.alive = AtomicBool::new(false);
        host.reinject_ok = false;
        let host: HostHandle = Arc::new(host);
        let (handle, mut events) = JobQueue::spawn(host, fast_engine(), Duration::from_millis(200));

        handle.enqueue(job("a"));
        match next_terminal(&mut events).await {
            QueueEvent::Error { id, error } => {
                assert_eq!(id, "a");
                assert!(matches!(error, BridgeError::InjectionFailed(_)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn live_surface_is_never_reestablished() {
        let host = Arc::new(TestHost::new("ok"));
        let handle_host: HostHandle = Arc::clone(&host) as HostHandle;
        let (handle, mut events) =
            JobQueue::spawn(handle_host, fast_engine(), Duration::from_millis(200));

        handle.enqueue(job("a"));
        let _ = next_terminal(&mut events).await;
        assert_eq!(host.reinjections.load(Ordering::SeqCst), 0);
        assert!(host.probes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_fires_without_tracking_a_job() {
        let host: HostHandle = Arc::new(TestHost::new("ok"));
        let (handle, mut events) = JobQueue::spawn(host, fast_engine(), Duration::from_millis(200));

        handle.test_prompt("Ответь одним словом: готов?").await.unwrap();
        // Diagnostic prompts never produce lifecycle events.
        assert!(events.try_recv().is_err());
        assert_eq!(handle.status().await.backlog, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reflects_host_and_backlog() {
        let host: HostHandle = Arc::new(TestHost::new("ok"));
        let (handle, _events) = JobQueue::spawn(host, fast_engine(), Duration::from_millis(200));
        let status = handle.status().await;
        assert!(status.host_located);
        assert!(status.surface_alive);
        assert_eq!(status.active_job, None);
        assert_eq!(status.backlog, 0);
    }
}
