//! # ds-protocol
//!
//! Shared contract types for the Digital Shelf keep-alive service: the
//! control messages understood by the background keep-alive worker, the
//! unsolicited keep-alive push it broadcasts to the rest of the process,
//! the merged status snapshot served by the ping manager, and the timing
//! constants both ping providers run on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ping period of the background keep-alive worker.
pub const WORKER_PING_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Ping period of the foreground (main-thread) pinger. Intentionally offset
/// from the worker period so the two providers do not tick in lockstep.
pub const MAIN_THREAD_PING_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Period of the worker's unsolicited `PING_KEEP_ALIVE` broadcast.
pub const KEEP_ALIVE_BROADCAST_INTERVAL: Duration = Duration::from_secs(60);

/// Quiet window for coalescing interaction-driven pings.
pub const INTERACTION_DEBOUNCE: Duration = Duration::from_secs(1);

/// How long the bridge waits for a worker reply before giving up.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard per-request cap inside a ping cycle. A hanging target counts as a
/// failure instead of stalling the whole tick.
pub const PING_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request timeout of the boot-time health probe.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rounds the boot-time health probe makes before giving up.
pub const HEALTH_PROBE_ATTEMPTS: u32 = 3;

/// Grace delay before the agent proceeds with an unresponsive backend.
pub const WAKE_GRACE_DELAY: Duration = Duration::from_secs(3);

/// Current response-cache generation. Bump to invalidate entries primed by
/// older worker builds.
pub const CACHE_GENERATION: &str = "digitalshelf-ping-v2";

/// User agent sent on every keep-alive request.
pub const PING_USER_AGENT: &str = "DigitalShelf-PingService/1.0";

/// Control operations accepted by the background keep-alive worker.
///
/// Every request yields exactly one reply on its reply channel: `Ack` for
/// the fire-and-forget operations, a payload for the query operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Begin/restart the ping timer, firing one cycle immediately.
    StartPing,
    /// Cancel the ping timer.
    StopPing,
    /// Run one cycle now, independent of the timer schedule.
    ForcePing,
    /// Report `{ isActive, lastPing }`.
    GetStatus,
    /// Run a backend-only cycle and report completion.
    TestBackend,
}

/// Replies produced by the worker, one per request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    /// Acknowledgement for `StartPing`, `StopPing` and `ForcePing`.
    Ack,
    Status(WorkerStatus),
    BackendTest(BackendTestReport),
}

/// Worker-side service state, as reported for `GET_STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping: Option<DateTime<Utc>>,
}

/// Reply payload of `TEST_BACKEND`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTestReport {
    pub backend_test: String,
    pub timestamp: DateTime<Utc>,
}

impl BackendTestReport {
    pub fn completed(timestamp: DateTime<Utc>) -> Self {
        Self {
            backend_test: "completed".to_string(),
            timestamp,
        }
    }
}

/// Unsolicited push the worker broadcasts to all listeners every minute.
/// Informational only; there is no consumer contract beyond logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PagePush {
    #[serde(rename = "PING_KEEP_ALIVE")]
    PingKeepAlive {
        /// Epoch milliseconds at broadcast time.
        timestamp: i64,
        services: ServiceCounts,
    },
}

/// Configured target counts carried in the keep-alive push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCounts {
    pub frontend: usize,
    pub backend: usize,
}

/// Which ping provider is currently carrying the keep-alive duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimaryMethod {
    ServiceWorker,
    MainThread,
    Both,
}

impl PrimaryMethod {
    /// Derives the primary method from the two provider states. Neither
    /// active degrades to `MainThread` (the initial/degenerate state).
    pub fn derive(worker_active: bool, main_active: bool) -> Self {
        match (worker_active, main_active) {
            (true, true) => Self::Both,
            (true, false) => Self::ServiceWorker,
            _ => Self::MainThread,
        }
    }
}

/// Snapshot of the worker-side provider as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceWorkerState {
    pub is_active: bool,
    pub is_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping: Option<DateTime<Utc>>,
}

impl Default for ServiceWorkerState {
    fn default() -> Self {
        Self {
            is_active: false,
            is_ready: false,
            last_ping: None,
        }
    }
}

/// Snapshot of the foreground provider. No last-ping timestamp is tracked
/// on this path; the foreground pinger is best-effort/supplementary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainThreadState {
    pub is_active: bool,
}

/// Merged view over both providers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallState {
    pub is_active: bool,
    pub primary_method: PrimaryMethod,
}

impl OverallState {
    pub fn derive(worker_active: bool, main_active: bool) -> Self {
        Self {
            is_active: worker_active || main_active,
            primary_method: PrimaryMethod::derive(worker_active, main_active),
        }
    }
}

impl Default for OverallState {
    fn default() -> Self {
        Self::derive(false, false)
    }
}

/// Full status snapshot assembled on demand by the ping manager. Never
/// stored; always recomputed from the provider states at query time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingStatus {
    pub is_initialized: bool,
    pub service_worker: ServiceWorkerState,
    pub main_thread: MainThreadState,
    pub overall: OverallState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_names_match_contract() {
        let json = serde_json::to_string(&WorkerRequest::StartPing).unwrap();
        assert_eq!(json, r#"{"type":"START_PING"}"#);
        let json = serde_json::to_string(&WorkerRequest::GetStatus).unwrap();
        assert_eq!(json, r#"{"type":"GET_STATUS"}"#);
    }

    #[test]
    fn push_carries_type_tag_and_counts() {
        let push = PagePush::PingKeepAlive {
            timestamp: 1_700_000_000_000,
            services: ServiceCounts {
                frontend: 3,
                backend: 4,
            },
        };
        let value = serde_json::to_value(push).unwrap();
        assert_eq!(value["type"], "PING_KEEP_ALIVE");
        assert_eq!(value["services"]["frontend"], 3);
        assert_eq!(value["services"]["backend"], 4);
    }

    #[test]
    fn primary_method_derivation() {
        assert_eq!(PrimaryMethod::derive(true, true), PrimaryMethod::Both);
        assert_eq!(
            PrimaryMethod::derive(true, false),
            PrimaryMethod::ServiceWorker
        );
        assert_eq!(
            PrimaryMethod::derive(false, true),
            PrimaryMethod::MainThread
        );
        assert_eq!(
            PrimaryMethod::derive(false, false),
            PrimaryMethod::MainThread
        );
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = PingStatus::default();
        let value = serde_json::to_value(status).unwrap();
        assert_eq!(value["isInitialized"], false);
        assert_eq!(value["serviceWorker"]["isReady"], false);
        assert_eq!(value["overall"]["primaryMethod"], "main-thread");
        // lastPing is omitted entirely until a ping has happened
        assert!(value["serviceWorker"].get("lastPing").is_none());
    }

    #[test]
    fn status_reply_wire_shape() {
        let status = WorkerStatus {
            is_active: true,
            last_ping: Some("2025-06-01T12:00:00Z".parse().unwrap()),
        };
        let value = serde_json::to_value(status).unwrap();
        assert_eq!(value["isActive"], true);
        assert_eq!(value["lastPing"], "2025-06-01T12:00:00Z");
    }
}
