//! Foreground keep-alive pinger.
//!
//! Runs on the interactive side of the process with the same cycle
//! semantics as the background worker, on a 4-minute period deliberately
//! offset from the worker's 3 minutes. On top of the timer it pings
//! opportunistically on activity events: visibility and focus changes ping
//! immediately, interactions (click, keydown, scroll) are coalesced into at
//! most one cycle per quiet window. The event subscription is acquired by
//! `start()` and released by `stop()`; nothing is registered globally.
//!
//! This provider is best-effort/supplementary: it tracks no last-ping
//! timestamp, only whether it is running.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use ds_protocol::{MainThreadState, INTERACTION_DEBOUNCE, MAIN_THREAD_PING_INTERVAL};

use crate::cycle::PingClient;
use crate::error::KeeperResult;
use crate::target::{backend_targets, frontend_targets, PingTarget, LAST_CHANCE_URL};

/// Activity on the interactive surface, as observed by whoever hosts the
/// pinger. Visibility/focus ping immediately; interactions are debounced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    VisibilityChange,
    WindowFocus,
    Interaction(InteractionKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Click,
    KeyDown,
    Scroll,
}

/// Tuning knobs, constructed per instance so tests can use stub targets
/// and short windows.
#[derive(Debug, Clone)]
pub struct ForegroundConfig {
    pub frontend_targets: Vec<PingTarget>,
    pub backend_targets: Vec<PingTarget>,
    pub ping_interval: Duration,
    pub debounce: Duration,
    /// Endpoint probed by `test_backend_connectivity`.
    pub connectivity_target: PingTarget,
}

impl Default for ForegroundConfig {
    fn default() -> Self {
        Self {
            frontend_targets: frontend_targets(),
            backend_targets: backend_targets(),
            ping_interval: MAIN_THREAD_PING_INTERVAL,
            debounce: INTERACTION_DEBOUNCE,
            connectivity_target: PingTarget::backend(LAST_CHANCE_URL),
        }
    }
}

pub struct ForegroundPinger {
    config: ForegroundConfig,
    client: PingClient,
    activity: broadcast::Sender<ActivityEvent>,
    task: Option<JoinHandle<()>>,
    active: bool,
}

impl ForegroundPinger {
    pub fn new(activity: broadcast::Sender<ActivityEvent>) -> KeeperResult<Self> {
        Self::with_config(ForegroundConfig::default(), activity)
    }

    pub fn with_config(
        config: ForegroundConfig,
        activity: broadcast::Sender<ActivityEvent>,
    ) -> KeeperResult<Self> {
        Ok(Self {
            config,
            client: PingClient::new(None)?,
            activity,
            task: None,
            active: false,
        })
    }

    /// Arms the timer, subscribes to activity events and fires one
    /// immediate cycle. No-op when already running.
    pub fn start(&mut self) {
        if self.active {
            tracing::debug!("Foreground ping service is already running");
            return;
        }

        self.active = true;
        tracing::info!("Starting foreground ping service");

        let events = self.activity.subscribe();
        let client = self.client.clone();
        let config = self.config.clone();
        self.task = Some(tokio::spawn(run_loop(client, config, events)));
    }

    /// Disarms the timer and drops the event subscription. No-op when not
    /// running.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }

        self.active = false;
        tracing::info!("Stopping foreground ping service");

        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Runs one cycle right now, bypassing both the timer and the debounce.
    pub async fn force_ping(&self) {
        tracing::debug!("Foreground force ping requested");
        run_cycles(&self.client, &self.config).await;
    }

    /// Synchronous state snapshot; this path tracks activity only.
    pub fn get_status(&self) -> MainThreadState {
        MainThreadState {
            is_active: self.active,
        }
    }

    /// Single readable probe against the books endpoint. Never errors.
    pub async fn test_backend_connectivity(&self) -> bool {
        let target = std::slice::from_ref(&self.config.connectivity_target);
        let healthy = self.client.run_cycle(target).await.is_some();
        tracing::info!(
            "Backend connectivity test: {}",
            if healthy { "SUCCESS" } else { "FAILED" }
        );
        healthy
    }
}

impl Drop for ForegroundPinger {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// One frontend cycle then one backend cycle, same order as the worker.
async fn run_cycles(client: &PingClient, config: &ForegroundConfig) {
    client.run_cycle(&config.frontend_targets).await;
    client.run_cycle(&config.backend_targets).await;
}

async fn run_loop(
    client: PingClient,
    config: ForegroundConfig,
    mut events: broadcast::Receiver<ActivityEvent>,
) {
    let mut timer = interval(config.ping_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut events_open = true;
    let mut debounce_deadline: Option<Instant> = None;

    loop {
        // Disabled branches still evaluate their future expression.
        let idle_deadline =
            debounce_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        tokio::select! {
            // First tick fires immediately: the initial cycle on start().
            _ = timer.tick() => {
                run_cycles(&client, &config).await;
            }
            event = events.recv(), if events_open => {
                match event {
                    Ok(ActivityEvent::VisibilityChange) | Ok(ActivityEvent::WindowFocus) => {
                        tracing::debug!("Activity event, pinging immediately");
                        run_cycles(&client, &config).await;
                    }
                    Ok(ActivityEvent::Interaction(kind)) => {
                        // Only the last interaction within the quiet window
                        // fires; each new one pushes the deadline out.
                        tracing::trace!("Interaction ({kind:?}), debouncing ping");
                        debounce_deadline = Some(Instant::now() + config.debounce);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Activity stream lagged, {skipped} events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Event source went away; keep the timer running.
                        events_open = false;
                    }
                }
            }
            _ = sleep_until(idle_deadline), if debounce_deadline.is_some() => {
                debounce_deadline = None;
                tracing::debug!("Interaction quiet window elapsed, pinging");
                run_cycles(&client, &config).await;
            }
        }
    }
}
