//! Boot-time health prober.
//!
//! Distinct from the ongoing keep-alive pingers: this runs once at startup
//! to decide whether the backend is awake before the agent settles into its
//! steady state. Every request carries a hard timeout, every failure is a
//! non-match rather than an error, and the caller is never blocked
//! indefinitely — an unresponsive backend degrades to a fixed grace delay.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Serialize;

use ds_protocol::{
    HEALTH_PROBE_ATTEMPTS, HEALTH_PROBE_TIMEOUT, PING_USER_AGENT, WAKE_GRACE_DELAY,
};

use crate::error::KeeperResult;
use crate::target::{HEALTH_PROBE_URLS, LAST_CHANCE_URL};

/// One backend health sample, as surfaced to the status consumer loop.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub healthy: bool,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthProber {
    client: reqwest::Client,
}

impl HealthProber {
    pub fn new() -> KeeperResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(PING_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Walks `urls` in order for `attempts` rounds, with a capped linear
    /// backoff between rounds. Returns true on the first HTTP-ok response.
    pub async fn probe(&self, urls: &[&str], attempts: u32, timeout: Duration) -> bool {
        for round in 0..attempts {
            for url in urls {
                if self.fetch_ok(url, timeout).await {
                    tracing::info!("Health probe succeeded against {}", url);
                    return true;
                }
            }
            tokio::time::sleep(backoff_delay(round)).await;
        }
        false
    }

    /// Boot sequence around [`probe`]: configured endpoints first, then one
    /// last-chance check against the endpoint that usually wakes first, then
    /// a fixed grace delay. Returns whether the backend answered.
    pub async fn wait_for_backend(&self) -> bool {
        if self
            .probe(&HEALTH_PROBE_URLS, HEALTH_PROBE_ATTEMPTS, HEALTH_PROBE_TIMEOUT)
            .await
        {
            return true;
        }

        tracing::warn!("Health probe exhausted, trying last-chance endpoint");
        if self.fetch_ok(LAST_CHANCE_URL, HEALTH_PROBE_TIMEOUT).await {
            return true;
        }

        tracing::warn!(
            "Backend still waking up; proceeding after {}s grace",
            WAKE_GRACE_DELAY.as_secs()
        );
        tokio::time::sleep(WAKE_GRACE_DELAY).await;
        false
    }

    /// Measures one readable request against the books endpoint. Never
    /// errors; an unreachable backend samples as unhealthy.
    pub async fn sample_backend(&self) -> BackendHealth {
        self.sample(LAST_CHANCE_URL).await
    }

    async fn sample(&self, url: &str) -> BackendHealth {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("X-Ping", HeaderValue::from_static("health-check"));

        let start = std::time::Instant::now();
        let healthy = match self
            .client
            .get(url)
            .headers(headers)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Backend health sample failed: {}", e);
                false
            }
        };

        BackendHealth {
            healthy,
            response_time_ms: if healthy {
                start.elapsed().as_millis() as u64
            } else {
                0
            },
            checked_at: Utc::now(),
        }
    }

    /// One GET with a hard timeout. Aborted or failed requests are a
    /// non-match, not an error.
    async fn fetch_ok(&self, url: &str, timeout: Duration) -> bool {
        let request = self.client.get(url).timeout(timeout);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Health probe miss for {}: {}", url, e);
                false
            }
        }
    }
}

/// Backoff between probe rounds: `min(1500 + round * 500, 4000)` ms.
pub fn backoff_delay(round: u32) -> Duration {
    Duration::from_millis((1500 + u64::from(round) * 500).min(4000))
}
