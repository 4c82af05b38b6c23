//! Ping manager: the single entry point over both keep-alive providers.
//!
//! Decides which of {background worker, foreground pinger} is active,
//! starts/stops/queries both, and merges their state into one status view.
//! When worker registration fails, the manager degrades one-way to the
//! foreground pinger for the rest of the process lifetime.
//!
//! A keep-alive failure must never propagate into an application-visible
//! failure: every public method here catches its internal errors, and in
//! the worst case keep-alive silently does less work.

use tokio::sync::broadcast;

use ds_protocol::{OverallState, PagePush, PingStatus, ServiceWorkerState};

use crate::bridge::WorkerBridge;
use crate::error::KeeperResult;
use crate::foreground::{ActivityEvent, ForegroundPinger};

/// Provider-selection flags. Takes effect on the next `initialize()` or
/// `start()`; changing them does not retroactively stop a running provider.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub use_service_worker: bool,
    pub fallback_to_main_thread: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            use_service_worker: true,
            fallback_to_main_thread: true,
        }
    }
}

/// Partial update for [`ManagerConfig`]; absent fields keep their value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigUpdate {
    pub use_service_worker: Option<bool>,
    pub fallback_to_main_thread: Option<bool>,
}

pub struct PingManager {
    config: ManagerConfig,
    initialized: bool,
    bridge: WorkerBridge,
    foreground: ForegroundPinger,
}

impl PingManager {
    /// Manager over the compiled-in targets. `activity` is the stream of
    /// interactive-surface events the foreground pinger subscribes to.
    pub fn new(activity: broadcast::Sender<ActivityEvent>) -> KeeperResult<Self> {
        Ok(Self::with_parts(
            WorkerBridge::new(),
            ForegroundPinger::new(activity)?,
        ))
    }

    /// Assembles a manager from pre-built parts; tests inject stub-backed
    /// bridges and pingers here.
    pub fn with_parts(bridge: WorkerBridge, foreground: ForegroundPinger) -> Self {
        Self {
            config: ManagerConfig::default(),
            initialized: false,
            bridge,
            foreground,
        }
    }

    /// Brings up a keep-alive path. Idempotent: a second call after the
    /// first resolves is a no-op. The check is a plain flag test, not a
    /// lock; callers must not race two initializations.
    pub async fn initialize(&mut self) {
        if self.initialized {
            tracing::debug!("Ping manager already initialized");
            return;
        }

        tracing::info!("Initializing ping manager...");

        match self.try_initialize().await {
            Ok(()) => {
                self.initialized = true;
                tracing::info!("Ping manager initialized");
            }
            Err(e) => {
                tracing::error!("Ping manager initialization failed: {}", e);
                // Whatever went wrong above, a permitted fallback still
                // leaves the application with one keep-alive path.
                if self.config.fallback_to_main_thread {
                    tracing::info!("Starting foreground ping service as fallback");
                    self.foreground.start();
                    self.initialized = true;
                }
            }
        }
    }

    async fn try_initialize(&mut self) -> KeeperResult<()> {
        if self.config.use_service_worker {
            if self.bridge.register().await.is_some() {
                tracing::info!("Worker keep-alive path initialized");
                self.bridge.start_ping().await?;
            } else {
                tracing::warn!("Worker registration failed, falling back to foreground service");
                // One-way degradation: no registration retry this session.
                self.config.use_service_worker = false;
            }
        }

        if !self.config.use_service_worker && self.config.fallback_to_main_thread {
            self.foreground.start();
        }

        Ok(())
    }

    /// (Re)starts every enabled provider; used to resume after `stop()`.
    pub async fn start(&mut self) {
        if !self.initialized {
            self.initialize().await;
        }

        if self.config.use_service_worker {
            if let Err(e) = self.bridge.start_ping().await {
                tracing::error!("Failed to start worker ping: {}", e);
            }
        }
        if self.config.fallback_to_main_thread {
            self.foreground.start();
        }

        tracing::info!("All ping services started");
    }

    /// Stops every enabled provider. Does not change the initialized flag.
    pub async fn stop(&mut self) {
        if self.config.use_service_worker {
            if let Err(e) = self.bridge.stop_ping().await {
                tracing::error!("Failed to stop worker ping: {}", e);
            }
        }
        if self.config.fallback_to_main_thread {
            self.foreground.stop();
        }

        tracing::info!("All ping services stopped");
    }

    /// Forces an immediate cycle on every enabled provider, concurrently.
    /// Always resolves; provider errors are logged, not propagated.
    pub async fn force_ping(&self) {
        let worker = async {
            if self.config.use_service_worker {
                if let Err(e) = self.bridge.force_ping().await {
                    tracing::error!("Worker force ping failed: {}", e);
                }
            }
        };
        let main_thread = async {
            if self.config.fallback_to_main_thread {
                self.foreground.force_ping().await;
            }
        };
        tokio::join!(worker, main_thread);

        tracing::debug!("Force ping executed on all services");
    }

    /// Assembles a fresh status snapshot. Never fails: a worker query error
    /// degrades the worker portion to its inactive defaults.
    pub async fn get_status(&self) -> PingStatus {
        let mut status = PingStatus {
            is_initialized: self.initialized,
            ..PingStatus::default()
        };

        if self.config.use_service_worker {
            match self.bridge.get_status().await {
                Ok(worker_status) => {
                    status.service_worker = ServiceWorkerState {
                        is_active: worker_status.is_active,
                        is_ready: self.bridge.is_ready(),
                        last_ping: worker_status.last_ping,
                    };
                }
                Err(e) => {
                    tracing::warn!("Could not get worker status: {}", e);
                }
            }
        }

        if self.config.fallback_to_main_thread {
            status.main_thread = self.foreground.get_status();
        }

        status.overall = OverallState::derive(
            status.service_worker.is_active,
            status.main_thread.is_active,
        );
        status
    }

    /// Updates the provider-selection flags.
    pub fn configure(&mut self, update: ConfigUpdate) {
        if let Some(use_service_worker) = update.use_service_worker {
            self.config.use_service_worker = use_service_worker;
        }
        if let Some(fallback) = update.fallback_to_main_thread {
            self.config.fallback_to_main_thread = fallback;
        }

        tracing::info!(
            "Ping manager configured: use_service_worker={}, fallback_to_main_thread={}",
            self.config.use_service_worker,
            self.config.fallback_to_main_thread
        );
    }

    /// Tears both providers down and unregisters the worker if one was
    /// registered. The manager may be re-initialized afterwards.
    pub async fn destroy(&mut self) {
        self.stop().await;

        if self.config.use_service_worker {
            self.bridge.unregister().await;
        }

        self.initialized = false;
        tracing::info!("Ping manager destroyed");
    }

    /// Whether at least one provider reports active.
    pub async fn is_healthy(&self) -> bool {
        self.get_status().await.overall.is_active
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    /// Listener for the worker's keep-alive broadcast, when one is
    /// registered.
    pub fn subscribe_pushes(&self) -> Option<broadcast::Receiver<PagePush>> {
        self.bridge.subscribe_pushes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use ds_protocol::PrimaryMethod;

    use crate::cycle::tests::spawn_stub;
    use crate::foreground::ForegroundConfig;
    use crate::target::PingTarget;
    use crate::worker::WorkerConfig;

    async fn stub_parts() -> (WorkerBridge, ForegroundPinger, Arc<AtomicUsize>) {
        let (url, hits) = spawn_stub(200, r#"{"ok":true}"#).await;

        let worker_config = WorkerConfig {
            frontend_targets: Vec::new(),
            backend_targets: vec![PingTarget::backend(url.clone())],
            ping_interval: Duration::from_secs(300),
            broadcast_interval: Duration::from_secs(300),
            cache_generation: "test-gen".to_string(),
            auto_start: false,
        };
        let foreground_config = ForegroundConfig {
            frontend_targets: Vec::new(),
            backend_targets: vec![PingTarget::backend(url.clone())],
            ping_interval: Duration::from_secs(300),
            debounce: Duration::from_millis(100),
            connectivity_target: PingTarget::backend(url),
        };

        let (activity, _) = broadcast::channel(8);
        let bridge = WorkerBridge::with_config(worker_config);
        let foreground = ForegroundPinger::with_config(foreground_config, activity).unwrap();
        (bridge, foreground, hits)
    }

    #[tokio::test]
    async fn initialize_prefers_the_worker_path() {
        let (bridge, foreground, _hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(bridge, foreground);

        manager.initialize().await;

        assert!(manager.is_initialized());
        let status = manager.get_status().await;
        assert!(status.service_worker.is_active);
        assert!(status.service_worker.is_ready);
        // The worker registered, so the foreground fallback stays idle.
        assert!(!status.main_thread.is_active);
        assert_eq!(status.overall.primary_method, PrimaryMethod::ServiceWorker);
    }

    #[tokio::test]
    async fn registration_failure_falls_back_deterministically() {
        let (_, foreground, hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(WorkerBridge::unsupported(), foreground);

        manager.initialize().await;

        assert!(manager.is_initialized());
        assert!(!manager.config().use_service_worker);

        let status = manager.get_status().await;
        assert!(!status.service_worker.is_active);
        assert!(status.main_thread.is_active);
        assert!(status.overall.is_active);
        assert_eq!(status.overall.primary_method, PrimaryMethod::MainThread);

        // The fallback actually pings.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (_, foreground, hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(WorkerBridge::unsupported(), foreground);

        manager.initialize().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let after_first = hits.load(Ordering::SeqCst);

        manager.initialize().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        // No duplicate foreground timer: no extra initial cycle fired.
        assert_eq!(hits.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn both_providers_active_report_both() {
        let (bridge, foreground, _hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(bridge, foreground);

        manager.initialize().await;
        // start() unconditionally (re)starts every enabled provider.
        manager.start().await;

        let status = manager.get_status().await;
        assert!(status.service_worker.is_active);
        assert!(status.main_thread.is_active);
        assert_eq!(status.overall.primary_method, PrimaryMethod::Both);
        assert!(manager.is_healthy().await);
    }

    #[tokio::test]
    async fn status_degrades_when_the_worker_vanishes() {
        let (bridge, foreground, _hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(bridge, foreground);

        manager.initialize().await;
        assert!(manager.get_status().await.service_worker.is_active);

        // Worker goes away without the manager noticing.
        manager.bridge.unregister().await;

        let status = manager.get_status().await;
        assert!(!status.service_worker.is_active);
        assert!(!status.service_worker.is_ready);
        assert!(status.is_initialized);
    }

    #[tokio::test]
    async fn destroy_then_reinitialize_restores_service() {
        let (bridge, foreground, _hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(bridge, foreground);

        manager.initialize().await;
        assert!(manager.is_healthy().await);

        manager.destroy().await;
        assert!(!manager.is_initialized());
        let status = manager.get_status().await;
        assert!(!status.overall.is_active);

        manager.initialize().await;
        assert!(manager.is_initialized());
        assert!(manager.is_healthy().await);
    }

    #[tokio::test]
    async fn force_ping_always_resolves() {
        let (_, foreground, _hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(WorkerBridge::unsupported(), foreground);

        // Never initialized, worker unavailable: still resolves quietly.
        manager.force_ping().await;

        manager.initialize().await;
        manager.force_ping().await;
    }

    #[tokio::test]
    async fn configure_updates_flags_for_the_next_start() {
        let (bridge, foreground, _hits) = stub_parts().await;
        let mut manager = PingManager::with_parts(bridge, foreground);

        manager.configure(ConfigUpdate {
            use_service_worker: Some(false),
            fallback_to_main_thread: None,
        });
        assert!(!manager.config().use_service_worker);
        assert!(manager.config().fallback_to_main_thread);

        manager.initialize().await;
        let status = manager.get_status().await;
        assert!(!status.service_worker.is_active);
        assert!(status.main_thread.is_active);
    }
}
