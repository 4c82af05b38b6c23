//! Bridge between the ping manager and the background keep-alive worker.
//!
//! Adapts worker registration and message passing into awaitable calls:
//! `register()` spawns the worker and waits for its ready signal, and every
//! control call opens a dedicated one-shot reply channel and resolves with
//! the first message received on it, bounded by a reply timeout. The
//! registration handle and the ready flag live here and nowhere else.

use std::time::Duration;

use ds_protocol::{BackendTestReport, WorkerReply, WorkerRequest, WorkerStatus, REPLY_TIMEOUT};

use crate::error::{KeeperError, KeeperResult};
use crate::worker::{self, WorkerCommand, WorkerConfig, WorkerHandle};

pub struct WorkerBridge {
    config: WorkerConfig,
    supported: bool,
    reply_timeout: Duration,
    handle: Option<WorkerHandle>,
    ready: bool,
}

impl WorkerBridge {
    pub fn new() -> Self {
        Self::with_config(WorkerConfig::default())
    }

    /// Bridge for a worker built from `config`; tests point this at stub
    /// targets and short periods.
    pub fn with_config(config: WorkerConfig) -> Self {
        Self {
            config,
            supported: true,
            reply_timeout: REPLY_TIMEOUT,
            handle: None,
            ready: false,
        }
    }

    /// Bridge for a host without background-worker support: `register()`
    /// always reports failure, exercising the manager's fallback path.
    pub fn unsupported() -> Self {
        let mut bridge = Self::new();
        bridge.supported = false;
        bridge
    }

    /// Registers the worker: spawns it and awaits its activation signal.
    /// Returns the registration handle, or `None` on any failure — never
    /// errors. An existing live registration is returned as-is.
    pub async fn register(&mut self) -> Option<&WorkerHandle> {
        if !self.supported {
            tracing::warn!("Background keep-alive workers are not supported on this host");
            return None;
        }

        let live = self.ready && self.handle.as_ref().is_some_and(WorkerHandle::is_active);
        if !live {
            match worker::spawn(self.config.clone()) {
                Ok((handle, ready_rx)) => match ready_rx.await {
                    Ok(()) => {
                        tracing::info!("Keep-alive worker registered");
                        self.handle = Some(handle);
                        self.ready = true;
                    }
                    Err(_) => {
                        tracing::error!("Keep-alive worker exited before activation");
                        handle.join.abort();
                        self.handle = None;
                        self.ready = false;
                        return None;
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to register keep-alive worker: {}", e);
                    self.handle = None;
                    self.ready = false;
                    return None;
                }
            }
        }

        self.handle.as_ref()
    }

    /// True only after a successful `register()` and before `unregister()`.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Sends one control message and awaits its reply. Fails with
    /// [`KeeperError::WorkerNotActive`] when no worker holds the command
    /// channel — the manager uses that signal to fall back.
    pub async fn post(&self, op: WorkerRequest) -> KeeperResult<WorkerReply> {
        let handle = self.handle.as_ref().ok_or(KeeperError::WorkerNotActive)?;
        if !handle.is_active() {
            return Err(KeeperError::WorkerNotActive);
        }

        let (cmd, reply_rx) = WorkerCommand::new(op);
        let id = cmd.id;
        handle
            .commands
            .send(cmd)
            .await
            .map_err(|_| KeeperError::WorkerNotActive)?;

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(KeeperError::WorkerGone(op)),
            Err(_) => {
                tracing::warn!("Worker reply timeout for command {} ({:?})", id, op);
                Err(KeeperError::ReplyTimeout(op))
            }
        }
    }

    pub async fn start_ping(&self) -> KeeperResult<()> {
        self.post(WorkerRequest::StartPing).await.map(|_| ())
    }

    pub async fn stop_ping(&self) -> KeeperResult<()> {
        self.post(WorkerRequest::StopPing).await.map(|_| ())
    }

    pub async fn force_ping(&self) -> KeeperResult<()> {
        self.post(WorkerRequest::ForcePing).await.map(|_| ())
    }

    pub async fn get_status(&self) -> KeeperResult<WorkerStatus> {
        match self.post(WorkerRequest::GetStatus).await? {
            WorkerReply::Status(status) => Ok(status),
            _ => Err(KeeperError::UnexpectedReply(WorkerRequest::GetStatus)),
        }
    }

    pub async fn test_backend(&self) -> KeeperResult<BackendTestReport> {
        match self.post(WorkerRequest::TestBackend).await? {
            WorkerReply::BackendTest(report) => Ok(report),
            _ => Err(KeeperError::UnexpectedReply(WorkerRequest::TestBackend)),
        }
    }

    /// Listener for the worker's keep-alive broadcast, if one is registered.
    pub fn subscribe_pushes(&self) -> Option<tokio::sync::broadcast::Receiver<ds_protocol::PagePush>> {
        self.handle.as_ref().map(WorkerHandle::subscribe)
    }

    /// Best-effort teardown. Clears the ready flag and the handle regardless
    /// of what state the worker is in.
    pub async fn unregister(&mut self) {
        self.ready = false;
        if let Some(handle) = self.handle.take() {
            handle.join.abort();
            tracing::info!("Keep-alive worker unregistered");
        }
    }
}

impl Default for WorkerBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::{broadcast, mpsc};

    fn stub_config() -> WorkerConfig {
        WorkerConfig {
            frontend_targets: Vec::new(),
            backend_targets: Vec::new(),
            ping_interval: Duration::from_secs(60),
            broadcast_interval: Duration::from_secs(60),
            cache_generation: "test-gen".to_string(),
            auto_start: false,
        }
    }

    #[tokio::test]
    async fn register_then_query_status() {
        let mut bridge = WorkerBridge::with_config(stub_config());
        assert!(!bridge.is_ready());

        assert!(bridge.register().await.is_some());
        assert!(bridge.is_ready());

        let status = bridge.get_status().await.unwrap();
        assert!(!status.is_active);

        bridge.start_ping().await.unwrap();
        let status = bridge.get_status().await.unwrap();
        assert!(status.is_active);
    }

    #[tokio::test]
    async fn post_without_registration_is_not_active() {
        let bridge = WorkerBridge::with_config(stub_config());
        match bridge.post(WorkerRequest::GetStatus).await {
            Err(KeeperError::WorkerNotActive) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn post_with_dead_worker_is_not_active() {
        // Registration handle exists, but nothing holds the command channel:
        // the exact "registration.active is absent" condition.
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        drop(cmd_rx);
        let (push_tx, _) = broadcast::channel(1);
        let handle = WorkerHandle {
            commands: cmd_tx,
            pushes: push_tx,
            join: tokio::spawn(async {}),
        };

        let bridge = WorkerBridge {
            config: stub_config(),
            supported: true,
            reply_timeout: REPLY_TIMEOUT,
            handle: Some(handle),
            ready: true,
        };

        match bridge.post(WorkerRequest::ForcePing).await {
            Err(KeeperError::WorkerNotActive) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_reply_times_out_instead_of_hanging() {
        // A worker that accepts commands but never answers them.
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WorkerCommand>(1);
        let (push_tx, _) = broadcast::channel(1);
        let join = tokio::spawn(async move {
            let mut parked = Vec::new();
            while let Some(cmd) = cmd_rx.recv().await {
                parked.push(cmd.reply);
            }
        });

        let bridge = WorkerBridge {
            config: stub_config(),
            supported: true,
            reply_timeout: Duration::from_millis(100),
            handle: Some(WorkerHandle {
                commands: cmd_tx,
                pushes: push_tx,
                join,
            }),
            ready: true,
        };

        match bridge.post(WorkerRequest::GetStatus).await {
            Err(KeeperError::ReplyTimeout(WorkerRequest::GetStatus)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregister_clears_ready_and_handle() {
        let mut bridge = WorkerBridge::with_config(stub_config());
        bridge.register().await.unwrap();
        assert!(bridge.is_ready());

        bridge.unregister().await;
        assert!(!bridge.is_ready());

        match bridge.post(WorkerRequest::GetStatus).await {
            Err(KeeperError::WorkerNotActive) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
