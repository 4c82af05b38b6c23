//! Digital Shelf keep-alive service.
//!
//! Two independent ping providers keep the free-tier deployment from idling
//! out: a background keep-alive worker with its own timer and message-based
//! control surface, and a foreground pinger driven by a timer plus activity
//! events. The [`manager::PingManager`] coordinates both, with a one-way
//! fallback to the foreground path when the worker cannot be registered.
//! The [`prober::HealthProber`] is the separate boot-time readiness check.

pub mod bridge;
pub mod cache;
pub mod cycle;
pub mod error;
pub mod foreground;
pub mod manager;
pub mod prober;
pub mod target;
pub mod worker;

pub use error::{KeeperError, KeeperResult};
pub use manager::PingManager;
