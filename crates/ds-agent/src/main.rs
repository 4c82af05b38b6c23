//! # Digital Shelf Keep-Alive Agent
//!
//! Keeps the free-tier Digital Shelf deployment warm. Two independent ping
//! providers run side by side: a background keep-alive worker with its own
//! timer and control channel, and a foreground pinger driven by a timer plus
//! activity events. The ping manager coordinates both and degrades to the
//! foreground path when the worker cannot be registered.
//!
//! ## Usage
//!
//! ```sh
//! ds-agent            # Run in foreground (default)
//! ds-agent run        # Same as above
//! ds-agent version    # Print version info
//! ```

use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use ds_agent::foreground::ActivityEvent;
use ds_agent::manager::PingManager;
use ds_agent::prober::HealthProber;
use ds_protocol::PagePush;

/// How often the run loop polls the merged keep-alive status.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How often the run loop samples backend health and response time.
const BACKEND_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let subcommand = args.get(1).map(String::as_str).unwrap_or("run");

    match subcommand {
        "version" => {
            println!(
                "Digital Shelf Keep-Alive Agent v{} ({} {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH,
            );
            return Ok(());
        }
        "run" => {}
        other => {
            anyhow::bail!("Unknown subcommand: {}", other);
        }
    }

    tracing::info!(
        "Digital Shelf Keep-Alive Agent v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    // ── Boot probe: is the backend awake yet? ────────────────
    let prober = HealthProber::new()?;
    tracing::info!("Checking backend readiness, a cold start can take a couple of minutes...");
    if prober.wait_for_backend().await {
        tracing::info!("Backend is awake");
    } else {
        tracing::warn!("Backend is still starting up; the keep-alive pingers will bring it around");
    }

    // ── Keep-alive providers ─────────────────────────────────
    // The activity channel is the seam where an interactive host reports
    // visibility/focus/interaction events; the agent itself has none.
    let (activity, _) = broadcast::channel::<ActivityEvent>(32);
    let mut manager = PingManager::new(activity.clone())?;
    manager.initialize().await;

    let mut pushes = manager.subscribe_pushes();

    // ── Status consumer loop ─────────────────────────────────
    let mut status_timer = tokio::time::interval(STATUS_POLL_INTERVAL);
    let mut sample_timer = tokio::time::interval(BACKEND_SAMPLE_INTERVAL);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = status_timer.tick() => {
                let status = manager.get_status().await;
                tracing::info!(
                    "Keep-alive status: active={} method={:?} worker_ready={} last_ping={:?}",
                    status.overall.is_active,
                    status.overall.primary_method,
                    status.service_worker.is_ready,
                    status.service_worker.last_ping,
                );
            }
            _ = sample_timer.tick() => {
                let sample = prober.sample_backend().await;
                if sample.healthy {
                    tracing::info!("Backend healthy ({} ms)", sample.response_time_ms);
                } else {
                    tracing::warn!("Backend health sample failed");
                }
            }
            push = next_push(&mut pushes) => {
                let PagePush::PingKeepAlive { timestamp, services } = push;
                tracing::debug!(
                    "Worker keep-alive push at {}: {} frontend / {} backend targets",
                    timestamp,
                    services.frontend,
                    services.backend,
                );
            }
            _ = &mut ctrl_c => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.destroy().await;
    tracing::info!("Keep-alive agent stopped");
    Ok(())
}

/// Next keep-alive push, if a worker is registered. Parks forever when
/// there is nothing to listen to so the select loop ignores this branch.
async fn next_push(pushes: &mut Option<broadcast::Receiver<PagePush>>) -> PagePush {
    loop {
        match pushes {
            Some(rx) => match rx.recv().await {
                Ok(push) => return push,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Keep-alive push stream lagged, {skipped} skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    *pushes = None;
                }
            },
            None => std::future::pending::<()>().await,
        }
    }
}
