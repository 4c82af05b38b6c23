//! Background keep-alive worker.
//!
//! An independently scheduled task that owns its own ping timer and persists
//! for as long as it stays registered, regardless of what the rest of the
//! process is doing. It shares no state with other components: control
//! arrives as [`WorkerCommand`] messages, each carrying its own one-shot
//! reply channel, and the worker pushes an informational `PING_KEEP_ALIVE`
//! broadcast to all listeners once a minute.
//!
//! Lifecycle: Installing (cache pre-warm, best-effort) → Activated (foreign
//! cache generations swept, readiness signalled) → Running ⇄ Stopped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use ds_protocol::{
    BackendTestReport, PagePush, ServiceCounts, WorkerReply, WorkerRequest, WorkerStatus,
    CACHE_GENERATION, KEEP_ALIVE_BROADCAST_INTERVAL, WORKER_PING_INTERVAL,
};

use crate::cache::ResponseCache;
use crate::cycle::PingClient;
use crate::error::KeeperResult;
use crate::target::{backend_targets, frontend_targets, PingTarget};

/// One control message: the operation plus its dedicated reply channel.
/// The id exists for log correlation only.
#[derive(Debug)]
pub struct WorkerCommand {
    pub id: Uuid,
    pub op: WorkerRequest,
    pub reply: oneshot::Sender<WorkerReply>,
}

impl WorkerCommand {
    pub fn new(op: WorkerRequest) -> (Self, oneshot::Receiver<WorkerReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id: Uuid::new_v4(),
                op,
                reply: tx,
            },
            rx,
        )
    }
}

/// Everything the worker needs to run. Constructed per instance so tests
/// can point a worker at local stubs with short periods.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub frontend_targets: Vec<PingTarget>,
    pub backend_targets: Vec<PingTarget>,
    pub ping_interval: Duration,
    pub broadcast_interval: Duration,
    pub cache_generation: String,
    /// Whether the worker arms its timer on load, before any `START_PING`.
    pub auto_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            frontend_targets: frontend_targets(),
            backend_targets: backend_targets(),
            ping_interval: WORKER_PING_INTERVAL,
            broadcast_interval: KEEP_ALIVE_BROADCAST_INTERVAL,
            cache_generation: CACHE_GENERATION.to_string(),
            auto_start: true,
        }
    }
}

/// Registration handle for a spawned worker. Owned by the bridge; dropping
/// every command sender lets the worker task drain and exit.
#[derive(Debug)]
pub struct WorkerHandle {
    pub commands: mpsc::Sender<WorkerCommand>,
    pub pushes: broadcast::Sender<PagePush>,
    pub join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Whether a worker currently holds the command channel.
    pub fn is_active(&self) -> bool {
        !self.commands.is_closed()
    }

    /// New listener for the worker's keep-alive broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<PagePush> {
        self.pushes.subscribe()
    }
}

/// Spawns the worker task. The returned receiver fires once the worker has
/// finished installing and activating (the "ready to control" signal).
pub fn spawn(config: WorkerConfig) -> KeeperResult<(WorkerHandle, oneshot::Receiver<()>)> {
    let client = PingClient::new(Some("service-worker"))?;
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (push_tx, _) = broadcast::channel(16);
    let (ready_tx, ready_rx) = oneshot::channel();

    let worker = KeepAliveWorker {
        config,
        client,
        cache: ResponseCache::new(),
        timer_active: false,
        last_ping: None,
        pushes: push_tx.clone(),
    };

    let join = tokio::spawn(worker.run(cmd_rx, ready_tx));

    Ok((
        WorkerHandle {
            commands: cmd_tx,
            pushes: push_tx,
            join,
        },
        ready_rx,
    ))
}

struct KeepAliveWorker {
    config: WorkerConfig,
    client: PingClient,
    cache: ResponseCache,
    timer_active: bool,
    last_ping: Option<DateTime<Utc>>,
    pushes: broadcast::Sender<PagePush>,
}

impl KeepAliveWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        ready: oneshot::Sender<()>,
    ) {
        // ── Install: pre-warm the response cache ─────────────────
        tracing::info!("Keep-alive worker installing...");
        let all_targets: Vec<PingTarget> = self
            .config
            .frontend_targets
            .iter()
            .chain(self.config.backend_targets.iter())
            .cloned()
            .collect();
        self.cache
            .prime(&self.config.cache_generation, &self.client, &all_targets)
            .await;

        // ── Activate: sweep old generations, take control now ────
        self.cache.activate(&self.config.cache_generation);
        if ready.send(()).is_err() {
            tracing::warn!("Registration dropped before worker activation");
            return;
        }
        tracing::info!("Keep-alive worker activated");

        self.timer_active = self.config.auto_start;
        let mut ping_timer = self.fresh_ping_timer();
        let mut broadcast_timer = interval_at(
            Instant::now() + self.config.broadcast_interval,
            self.config.broadcast_interval,
        );
        broadcast_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd, &mut ping_timer).await,
                        // Every sender dropped: the worker was unregistered.
                        None => break,
                    }
                }
                _ = ping_timer.tick(), if self.timer_active => {
                    self.run_comprehensive_cycle().await;
                }
                _ = broadcast_timer.tick() => {
                    self.broadcast_keep_alive();
                }
            }
        }

        tracing::info!("Keep-alive worker unregistered, exiting");
    }

    async fn handle_command(&mut self, cmd: WorkerCommand, ping_timer: &mut Interval) {
        tracing::debug!("Worker command {}: {:?}", cmd.id, cmd.op);

        let reply = match cmd.op {
            WorkerRequest::StartPing => {
                // Restart clears any prior timer; the fresh interval fires
                // its first tick immediately, giving the initial cycle.
                *ping_timer = self.fresh_ping_timer();
                self.timer_active = true;
                WorkerReply::Ack
            }
            WorkerRequest::StopPing => {
                self.timer_active = false;
                tracing::info!("Stopped ping timer in keep-alive worker");
                WorkerReply::Ack
            }
            WorkerRequest::ForcePing => {
                self.run_comprehensive_cycle().await;
                WorkerReply::Ack
            }
            WorkerRequest::GetStatus => WorkerReply::Status(WorkerStatus {
                is_active: self.timer_active,
                last_ping: self.last_ping,
            }),
            WorkerRequest::TestBackend => {
                self.run_backend_cycle().await;
                WorkerReply::BackendTest(BackendTestReport::completed(Utc::now()))
            }
        };

        if cmd.reply.send(reply).is_err() {
            tracing::debug!("Reply channel for command {} already dropped", cmd.id);
        }
    }

    /// One frontend cycle, then one backend cycle, sequentially.
    async fn run_comprehensive_cycle(&mut self) {
        tracing::debug!("Worker: running comprehensive ping cycle");
        self.run_frontend_cycle().await;
        self.run_backend_cycle().await;
    }

    async fn run_frontend_cycle(&mut self) {
        if let Some(success) = self.client.run_cycle(&self.config.frontend_targets).await {
            self.record_success(success);
        }
    }

    async fn run_backend_cycle(&mut self) {
        if let Some(success) = self.client.run_cycle(&self.config.backend_targets).await {
            self.record_success(success);
        }
    }

    fn record_success(&mut self, success: crate::cycle::CycleSuccess) {
        self.last_ping = Some(Utc::now());
        self.cache.put(
            &self.config.cache_generation,
            &success.url,
            success.status,
            success.body.unwrap_or_default(),
        );
    }

    /// Push-only heartbeat to all open listeners; informational, no reply.
    fn broadcast_keep_alive(&self) {
        let push = PagePush::PingKeepAlive {
            timestamp: Utc::now().timestamp_millis(),
            services: ServiceCounts {
                frontend: self.config.frontend_targets.len(),
                backend: self.config.backend_targets.len(),
            },
        };
        // No listeners is fine; the broadcast is best-effort.
        let _ = self.pushes.send(push);
    }

    fn fresh_ping_timer(&self) -> Interval {
        let mut timer = interval(self.config.ping_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use crate::cycle::tests::spawn_stub;

    fn test_config(frontend: Vec<PingTarget>, backend: Vec<PingTarget>) -> WorkerConfig {
        WorkerConfig {
            frontend_targets: frontend,
            backend_targets: backend,
            ping_interval: Duration::from_secs(60),
            broadcast_interval: Duration::from_secs(60),
            cache_generation: "test-gen".to_string(),
            auto_start: false,
        }
    }

    async fn send(handle: &WorkerHandle, op: WorkerRequest) -> WorkerReply {
        let (cmd, rx) = WorkerCommand::new(op);
        handle.commands.send(cmd).await.expect("worker alive");
        rx.await.expect("worker replies")
    }

    #[tokio::test]
    async fn status_before_start_reports_inactive() {
        let (handle, ready) = spawn(test_config(Vec::new(), Vec::new())).unwrap();
        ready.await.unwrap();

        match send(&handle, WorkerRequest::GetStatus).await {
            WorkerReply::Status(status) => {
                assert!(!status.is_active);
                assert!(status.last_ping.is_none());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_ping_is_acked_and_activates_the_timer() {
        let (url, hits) = spawn_stub(200, r#"{"ok":true}"#).await;
        let config = test_config(Vec::new(), vec![PingTarget::backend(url)]);
        let (handle, ready) = spawn(config).unwrap();
        ready.await.unwrap();

        assert_eq!(send(&handle, WorkerRequest::StartPing).await, WorkerReply::Ack);

        // The restarted timer fires its first cycle right away.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(hits.load(Ordering::SeqCst) >= 1);

        match send(&handle, WorkerRequest::GetStatus).await {
            WorkerReply::Status(status) => {
                assert!(status.is_active);
                assert!(status.last_ping.is_some());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_ping_deactivates_status() {
        let (handle, ready) = spawn(test_config(Vec::new(), Vec::new())).unwrap();
        ready.await.unwrap();

        assert_eq!(send(&handle, WorkerRequest::StartPing).await, WorkerReply::Ack);
        assert_eq!(send(&handle, WorkerRequest::StopPing).await, WorkerReply::Ack);

        match send(&handle, WorkerRequest::GetStatus).await {
            WorkerReply::Status(status) => assert!(!status.is_active),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_runs_backend_cycle_only() {
        let (frontend_url, frontend_hits) = spawn_stub(200, "ok").await;
        let (backend_url, backend_hits) = spawn_stub(200, r#"{"ok":true}"#).await;
        let config = test_config(
            vec![PingTarget::frontend(frontend_url)],
            vec![PingTarget::backend(backend_url)],
        );
        let (handle, ready) = spawn(config).unwrap();
        ready.await.unwrap();
        // Priming contacted both targets once; reset the baseline.
        let frontend_base = frontend_hits.load(Ordering::SeqCst);
        let backend_base = backend_hits.load(Ordering::SeqCst);

        match send(&handle, WorkerRequest::TestBackend).await {
            WorkerReply::BackendTest(report) => {
                assert_eq!(report.backend_test, "completed");
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        assert_eq!(backend_hits.load(Ordering::SeqCst), backend_base + 1);
        assert_eq!(frontend_hits.load(Ordering::SeqCst), frontend_base);
    }

    #[tokio::test]
    async fn broadcast_pushes_target_counts() {
        let mut config = test_config(Vec::new(), Vec::new());
        config.broadcast_interval = Duration::from_millis(50);
        let (handle, ready) = spawn(config).unwrap();
        ready.await.unwrap();

        let mut pushes = handle.subscribe();
        let push = tokio::time::timeout(Duration::from_secs(2), pushes.recv())
            .await
            .expect("push within the broadcast period")
            .expect("channel open");

        let PagePush::PingKeepAlive { timestamp, services } = push;
        assert!(timestamp > 0);
        assert_eq!(services.frontend, 0);
        assert_eq!(services.backend, 0);
    }

    #[tokio::test]
    async fn worker_exits_when_unregistered() {
        let (handle, ready) = spawn(test_config(Vec::new(), Vec::new())).unwrap();
        ready.await.unwrap();

        let WorkerHandle { commands, join, .. } = handle;
        drop(commands);

        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .expect("worker exits after last sender drops")
            .expect("worker task does not panic");
    }
}
