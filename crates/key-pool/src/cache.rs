//! TTL cache of per-credential usage snapshots
//!
//! Entries are keyed by the raw key value and replaced wholesale on every
//! successful query. A failed query reports "unknown" and leaves whatever
//! entry was already there.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use key_registry::Credential;
use provider::{UsageSnapshot, UsageSource};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CachedSnapshot {
    stored_at: Instant,
    snapshot: UsageSnapshot,
}

pub struct SnapshotCache {
    source: Arc<dyn UsageSource>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSnapshot>>,
}

impl SnapshotCache {
    pub fn new(source: Arc<dyn UsageSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached snapshot while `elapsed <= ttl` unless `force_refresh`;
    /// otherwise one upstream query. `None` means usage is unknown.
    ///
    /// Concurrent misses for the same key each query upstream.
    pub async fn get_or_fetch(
        &self,
        credential: &Credential,
        force_refresh: bool,
    ) -> Option<UsageSnapshot> {
        if !force_refresh && let Some(snapshot) = self.fresh(credential).await {
            debug!(alias = %credential.alias, "usage cache hit");
            return Some(snapshot);
        }

        match self.source.fetch_usage(credential).await {
            Ok(snapshot) => {
                self.entries.write().await.insert(
                    credential.key().to_string(),
                    CachedSnapshot {
                        stored_at: Instant::now(),
                        snapshot: snapshot.clone(),
                    },
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(
                    alias = %credential.alias,
                    key = %credential.mask(),
                    error = %e,
                    "usage query failed, treating usage as unknown"
                );
                None
            }
        }
    }

    /// Last stored snapshot regardless of age. Never queries upstream.
    pub async fn peek(&self, credential: &Credential) -> Option<UsageSnapshot> {
        self.entries
            .read()
            .await
            .get(credential.key())
            .map(|entry| entry.snapshot.clone())
    }

    async fn fresh(&self, credential: &Credential) -> Option<UsageSnapshot> {
        let entries = self.entries.read().await;
        let entry = entries.get(credential.key())?;
        (entry.stored_at.elapsed() <= self.ttl).then(|| entry.snapshot.clone())
    }
}
