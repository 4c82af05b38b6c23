//! Response cache owned by the background keep-alive worker.
//!
//! Successful ping responses are stored per generation, keyed by target URL.
//! The cache is written only by the worker's own sequential cycles, so a
//! plain map needs no synchronization. It exists for potential offline
//! serving; nothing in the keep-alive path reads it back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::cycle::PingClient;
use crate::target::PingTarget;

/// One stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: Option<u16>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

/// Generation-keyed response store.
#[derive(Debug, Default)]
pub struct ResponseCache {
    stores: HashMap<String, HashMap<String, CachedResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install-time pre-warm: fetch every configured target once and store
    /// what answers. Best-effort; failures are logged and never block
    /// activation.
    pub async fn prime(&mut self, generation: &str, client: &PingClient, targets: &[PingTarget]) {
        let mut stored = 0usize;
        for target in targets {
            match client.run_cycle(std::slice::from_ref(target)).await {
                Some(success) => {
                    self.put(
                        generation,
                        &success.url,
                        success.status,
                        success.body.unwrap_or_default(),
                    );
                    stored += 1;
                }
                None => {
                    tracing::debug!("Cache prime skipped unreachable target {}", target.url);
                }
            }
        }
        tracing::info!(
            "Response cache primed: {}/{} targets stored in {}",
            stored,
            targets.len(),
            generation
        );
    }

    /// Stores a response under `generation`, replacing any previous entry
    /// for the same URL.
    pub fn put(&mut self, generation: &str, url: &str, status: Option<u16>, body: Vec<u8>) {
        self.stores.entry(generation.to_string()).or_default().insert(
            url.to_string(),
            CachedResponse {
                status,
                body,
                stored_at: Utc::now(),
            },
        );
    }

    /// Activation sweep: discard every generation other than `current`.
    pub fn activate(&mut self, current: &str) {
        let before = self.stores.len();
        self.stores.retain(|generation, _| {
            if generation == current {
                true
            } else {
                tracing::info!("Deleting old cache generation: {}", generation);
                false
            }
        });
        if before != self.stores.len() {
            tracing::debug!("Cache generations swept: {} -> {}", before, self.stores.len());
        }
    }

    pub fn get(&self, generation: &str, url: &str) -> Option<&CachedResponse> {
        self.stores.get(generation)?.get(url)
    }

    /// Number of entries in `generation`.
    pub fn len(&self, generation: &str) -> usize {
        self.stores.get(generation).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, generation: &str) -> bool {
        self.len(generation) == 0
    }
}
