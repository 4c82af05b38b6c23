//! Ping cycle engine.
//!
//! One cycle walks an ordered target list and stops at the first success.
//! There is no retry within a cycle beyond list exhaustion, and no
//! concurrency: targets are tried strictly in order. Every request carries
//! a hard timeout so a hanging target counts as a failure instead of
//! stalling the whole keep-alive tick.

use ds_protocol::{PING_REQUEST_TIMEOUT, PING_USER_AGENT};

use crate::error::KeeperResult;
use crate::target::{PingTarget, RequestMode};

/// HTTP client shared by all cycles of one ping provider.
#[derive(Debug, Clone)]
pub struct PingClient {
    client: reqwest::Client,
    source: Option<String>,
}

/// First-success result of a cycle.
#[derive(Debug, Clone)]
pub struct CycleSuccess {
    pub url: String,
    /// Absent for opaque targets, where the response is never inspected.
    pub status: Option<u16>,
    /// Response body for readable targets, kept for the response cache.
    pub body: Option<Vec<u8>>,
}

impl PingClient {
    /// Builds the client. `source` is stamped into the `X-Source` header of
    /// every request (the worker identifies itself; the foreground pinger
    /// passes `None`).
    pub fn new(source: Option<&str>) -> KeeperResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(PING_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            source: source.map(str::to_string),
        })
    }

    /// Runs one ping cycle over `targets`, in order, first-success-wins.
    /// Returns `None` when the whole list is exhausted; per-target failures
    /// are recovered here and never escape.
    pub async fn run_cycle(&self, targets: &[PingTarget]) -> Option<CycleSuccess> {
        for target in targets {
            if let Some(success) = self.ping_target(target).await {
                tracing::debug!("Ping successful to {}", success.url);
                return Some(success);
            }
        }
        tracing::warn!(
            "Ping cycle exhausted all {} targets without success",
            targets.len()
        );
        None
    }

    /// Sends one keep-alive GET. Returns `None` on any failure.
    async fn ping_target(&self, target: &PingTarget) -> Option<CycleSuccess> {
        let request = self
            .client
            .get(&target.url)
            .headers(target.headers(self.source.as_deref()))
            .timeout(PING_REQUEST_TIMEOUT);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Ping failed to {}: {}", target.url, e);
                return None;
            }
        };

        match target.mode {
            // Opaque targets: reaching the origin is the success condition;
            // the response is never read.
            RequestMode::Opaque => Some(CycleSuccess {
                url: target.url.clone(),
                status: None,
                body: None,
            }),
            RequestMode::Readable => {
                let status = response.status();
                if !status.is_success() {
                    tracing::debug!("Ping to {} returned HTTP {}", target.url, status);
                    return None;
                }

                let body = match response.bytes().await {
                    Ok(bytes) => bytes.to_vec(),
                    Err(e) => {
                        tracing::debug!("Ping body read failed for {}: {}", target.url, e);
                        Vec::new()
                    }
                };

                // Verify the backend is actually serving JSON, but accept
                // any body; the ping already succeeded.
                if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
                    tracing::debug!("Ping response from {} is not JSON", target.url);
                }

                Some(CycleSuccess {
                    url: target.url.clone(),
                    status: Some(status.as_u16()),
                    body: Some(body),
                })
            }
        }
    }
}
