//! Ping target catalog.
//!
//! All endpoint URLs and request shapes are compiled in; nothing here is
//! driven by CLI flags, config files or environment variables.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Serialize;

/// Frontend-facing targets, tried in order. Requests are opaque: a response
/// of any status counts as success, the body is never read.
pub const FRONTEND_PING_URLS: [&str; 3] = [
    "https://digitalshelf.netlify.app",
    "https://digitalshelf.netlify.app/api/health",
    "https://digitalshelf.netlify.app/.netlify/functions/health",
];

/// Backend-facing targets, tried in order. Requests are readable: success is
/// an HTTP status in 200–299, and the JSON body is probed best-effort.
pub const BACKEND_PING_URLS: [&str; 4] = [
    "https://the-digital-shelf.onrender.com/api",
    "https://the-digital-shelf.onrender.com/api/books",
    "https://the-digital-shelf.onrender.com/api/auth/health",
    "https://the-digital-shelf.onrender.com/api/books/1",
];

/// Endpoints the boot-time health probe walks, in order.
pub const HEALTH_PROBE_URLS: [&str; 3] = [
    "https://the-digital-shelf.onrender.com/api/health",
    "https://the-digital-shelf.onrender.com/api/books",
    "https://the-digital-shelf.onrender.com/api/auth/health",
];

/// Last-chance endpoint when the probe exhausts its rounds. The books
/// listing is usually the first route to answer on a cold start.
pub const LAST_CHANCE_URL: &str = "https://the-digital-shelf.onrender.com/api/books";

/// How a target's response may be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Cross-origin, no-read: success means the request did not fail.
    Opaque,
    /// Fully readable: success requires a 2xx status.
    Readable,
}

/// Which side of the deployment a target keeps alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Frontend,
    Backend,
}

impl ServiceKind {
    /// Value of the `X-Service` header for this kind.
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Frontend => "frontend-ping",
            Self::Backend => "backend-ping",
        }
    }
}

/// One liveness-probe endpoint: URL, request mode and header identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingTarget {
    pub url: String,
    pub mode: RequestMode,
    pub service: ServiceKind,
}

impl PingTarget {
    pub fn frontend(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: RequestMode::Opaque,
            service: ServiceKind::Frontend,
        }
    }

    pub fn backend(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: RequestMode::Readable,
            service: ServiceKind::Backend,
        }
    }

    /// Fixed header set for this target. `source` identifies the issuing
    /// provider (the worker stamps `service-worker`, the foreground pinger
    /// sends none, matching the original request shapes).
    pub fn headers(&self, source: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Ping", HeaderValue::from_static("keep-alive"));
        headers.insert(
            "X-Service",
            HeaderValue::from_static(self.service.header_value()),
        );
        if let Some(source) = source {
            if let Ok(value) = HeaderValue::from_str(source) {
                headers.insert("X-Source", value);
            }
        }
        if self.service == ServiceKind::Backend {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
        headers
    }
}

/// The frontend target list, in ping order.
pub fn frontend_targets() -> Vec<PingTarget> {
    FRONTEND_PING_URLS
        .iter()
        .map(|url| PingTarget::frontend(*url))
        .collect()
}

/// The backend target list, in ping order.
pub fn backend_targets() -> Vec<PingTarget> {
    BACKEND_PING_URLS
        .iter()
        .map(|url| PingTarget::backend(*url))
        .collect()
}
