//! Round-robin credential selection under a monthly budget ceiling
//!
//! The cursor and the scan that reads it are held under one async mutex, so
//! concurrent callers observe a total order of selections. Usage snapshots
//! may be refreshed while the lock is held; that is the price of never
//! handing out the same cursor position twice.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use key_registry::Credential;
use provider::ProviderHealth;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::error::{Error, Result};

/// Usage report row for one credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialUsage {
    pub alias: String,
    pub mask: String,
    pub total_cost_usd: Option<f64>,
    pub total_calls: Option<u64>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub budget_usd: f64,
    pub exhausted: bool,
}

pub struct Pool {
    credentials: Vec<Credential>,
    cursor: Mutex<usize>,
    budget_usd: f64,
    cache: SnapshotCache,
}

impl Pool {
    pub fn new(credentials: Vec<Credential>, budget_usd: f64, cache: SnapshotCache) -> Self {
        info!(
            credentials = credentials.len(),
            budget_usd,
            ttl_secs = cache.ttl().as_secs(),
            "credential pool initialized"
        );
        Self {
            credentials,
            cursor: Mutex::new(0),
            budget_usd,
            cache,
        }
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn budget_usd(&self) -> f64 {
        self.budget_usd
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Select the next credential under budget, skipping keys in `excluded`.
    ///
    /// Scans at most N candidates starting from the cursor. A key whose usage
    /// cannot be resolved is selected optimistically. On success the cursor
    /// moves just past the selected key; on exhaustion it does not move.
    pub async fn select(&self, excluded: &HashSet<String>, force_refresh: bool) -> Result<Credential> {
        let n = self.credentials.len();
        if n == 0 {
            return Err(Error::Configuration("no credentials configured".into()));
        }

        let mut cursor = self.cursor.lock().await;
        let mut exhausted = Vec::new();

        for offset in 0..n {
            let idx = (*cursor + offset) % n;
            let candidate = &self.credentials[idx];
            if excluded.contains(candidate.key()) {
                debug!(alias = %candidate.alias, "skipping excluded credential");
                continue;
            }

            match self.cache.get_or_fetch(candidate, force_refresh).await {
                None => {
                    *cursor = (idx + 1) % n;
                    info!(
                        alias = %candidate.alias,
                        key = %candidate.mask(),
                        "selected credential with unknown usage"
                    );
                    metrics::counter!("meter_gate_selections_total", "alias" => candidate.alias.clone())
                        .increment(1);
                    return Ok(candidate.with_cost(None));
                }
                Some(snapshot) if snapshot.total_cost_usd < self.budget_usd => {
                    *cursor = (idx + 1) % n;
                    info!(
                        alias = %candidate.alias,
                        key = %candidate.mask(),
                        cost_usd = snapshot.total_cost_usd,
                        budget_usd = self.budget_usd,
                        "selected credential"
                    );
                    metrics::counter!("meter_gate_selections_total", "alias" => candidate.alias.clone())
                        .increment(1);
                    return Ok(candidate.with_cost(Some(snapshot.total_cost_usd)));
                }
                Some(snapshot) => {
                    warn!(
                        alias = %candidate.alias,
                        key = %candidate.mask(),
                        cost_usd = snapshot.total_cost_usd,
                        budget_usd = self.budget_usd,
                        "credential exhausted for the month"
                    );
                    exhausted.push(format!("{}:{:.2}", candidate.alias, snapshot.total_cost_usd));
                }
            }
        }

        Err(Error::Exhausted(if exhausted.is_empty() {
            "no eligible key".to_string()
        } else {
            format!(
                "no credentials available under monthly budget ${:.2}: {}",
                self.budget_usd,
                exhausted.join(", ")
            )
        }))
    }

    /// Pool health from cached snapshots only.
    ///
    /// Status mapping: nothing exhausted → healthy, some exhausted →
    /// degraded, all exhausted or no credentials → unhealthy. Keys with
    /// unknown usage count as usable.
    pub async fn health(&self) -> ProviderHealth {
        let mut credentials = Vec::with_capacity(self.credentials.len());
        let mut exhausted_count = 0usize;
        let mut unknown_count = 0usize;

        for credential in &self.credentials {
            let snapshot = self.cache.peek(credential).await;
            let cost = snapshot.as_ref().map(|s| s.total_cost_usd);
            let exhausted = cost.is_some_and(|c| c >= self.budget_usd);
            if exhausted {
                exhausted_count += 1;
            }
            if cost.is_none() {
                unknown_count += 1;
            }
            credentials.push(serde_json::json!({
                "alias": credential.alias,
                "key_mask": credential.mask(),
                "total_cost_usd": cost,
                "exhausted": exhausted,
            }));
        }

        let total = self.credentials.len();
        let status = if total == 0 || exhausted_count == total {
            "unhealthy"
        } else if exhausted_count > 0 {
            "degraded"
        } else {
            "healthy"
        };

        ProviderHealth {
            status: status.to_string(),
            pool: Some(serde_json::json!({
                "credentials_total": total,
                "credentials_available": total - exhausted_count,
                "credentials_exhausted": exhausted_count,
                "credentials_unknown": unknown_count,
                "budget_usd": self.budget_usd,
                "credentials": credentials,
            })),
        }
    }

    /// One row per credential, in configured order. Does not move the cursor.
    pub async fn usage_report(&self, force_refresh: bool) -> Vec<CredentialUsage> {
        let mut rows = Vec::with_capacity(self.credentials.len());
        for credential in &self.credentials {
            let snapshot = self.cache.get_or_fetch(credential, force_refresh).await;
            rows.push(CredentialUsage {
                alias: credential.alias.clone(),
                mask: credential.mask(),
                total_cost_usd: snapshot.as_ref().map(|s| s.total_cost_usd),
                total_calls: snapshot.as_ref().map(|s| s.total_calls),
                fetched_at: snapshot.as_ref().map(|s| s.fetched_at),
                budget_usd: self.budget_usd,
                exhausted: snapshot
                    .as_ref()
                    .is_some_and(|s| s.total_cost_usd >= self.budget_usd),
            });
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn creds(n: usize) -> Vec<Credential> {
        (1..=n)
            .map(|i| Credential::new(format!("key{i}"), format!("secret-{i}-xxxx")))
            .collect()
    }

    fn pool_with(source: &Arc<FakeSource>, credentials: Vec<Credential>, budget: f64) -> Pool {
        let cache = SnapshotCache::new(source.clone(), Duration::from_secs(600));
        Pool::new(credentials, budget, cache)
    }

    fn none() -> HashSet<String> {
        HashSet::new()
    }

    #[tokio::test]
    async fn round_robin_is_fair() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 0.0),
            ("secret-2-xxxx", 1.0),
            ("secret-3-xxxx", 2.0),
        ]));
        let pool = pool_with(&source, creds(3), 5.0);

        let mut picked = Vec::new();
        for _ in 0..6 {
            picked.push(pool.select(&none(), false).await.unwrap().alias);
        }
        assert_eq!(picked, vec!["key1", "key2", "key3", "key1", "key2", "key3"]);
    }

    #[tokio::test]
    async fn selection_carries_last_known_cost() {
        let source = Arc::new(FakeSource::with_costs(&[("secret-1-xxxx", 1.25)]));
        let pool = pool_with(&source, creds(1), 5.0);

        let selected = pool.select(&none(), false).await.unwrap();
        assert_eq!(selected.last_known_cost_usd, Some(1.25));
        // Registry copy is untouched.
        assert_eq!(pool.credentials()[0].last_known_cost_usd, None);
    }

    #[tokio::test]
    async fn unknown_usage_is_selected_optimistically() {
        let source = Arc::new(FakeSource::default());
        let pool = pool_with(&source, creds(2), 5.0);

        let first = pool.select(&none(), false).await.unwrap();
        let second = pool.select(&none(), false).await.unwrap();
        assert_eq!(first.alias, "key1");
        assert_eq!(first.last_known_cost_usd, None);
        assert_eq!(second.alias, "key2");
    }

    #[tokio::test]
    async fn exhausted_keys_are_skipped() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 5.0),
            ("secret-2-xxxx", 4.99),
            ("secret-3-xxxx", 0.0),
        ]));
        let pool = pool_with(&source, creds(3), 5.0);

        let mut picked = Vec::new();
        for _ in 0..4 {
            picked.push(pool.select(&none(), false).await.unwrap().alias);
        }
        assert_eq!(picked, vec!["key2", "key3", "key2", "key3"]);
    }

    #[tokio::test]
    async fn exhaustion_lists_every_candidate() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 5.0),
            ("secret-2-xxxx", 7.254),
        ]));
        let pool = pool_with(&source, creds(2), 5.0);

        let err = pool.select(&none(), false).await.unwrap_err();
        assert!(matches!(err, Error::Exhausted(_)));
        assert_eq!(
            err.to_string(),
            "no credentials available under monthly budget $5.00: key1:5.00, key2:7.25"
        );
    }

    #[tokio::test]
    async fn exhaustion_does_not_move_cursor() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 9.0),
            ("secret-2-xxxx", 9.0),
        ]));
        let pool = pool_with(&source, creds(2), 5.0);
        assert!(pool.select(&none(), false).await.is_err());

        source.set_cost("secret-1-xxxx", 0.0);
        source.set_cost("secret-2-xxxx", 0.0);
        let selected = pool.select(&none(), true).await.unwrap();
        assert_eq!(selected.alias, "key1");
    }

    #[tokio::test]
    async fn excluded_keys_are_never_returned() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 0.0),
            ("secret-2-xxxx", 0.0),
        ]));
        let pool = pool_with(&source, creds(2), 5.0);
        let excluded: HashSet<String> = ["secret-1-xxxx".to_string()].into();

        for _ in 0..3 {
            assert_eq!(pool.select(&excluded, false).await.unwrap().alias, "key2");
        }
    }

    #[tokio::test]
    async fn all_excluded_is_no_eligible_key() {
        let source = Arc::new(FakeSource::default());
        let pool = pool_with(&source, creds(1), 5.0);
        let excluded: HashSet<String> = ["secret-1-xxxx".to_string()].into();

        let err = pool.select(&excluded, false).await.unwrap_err();
        assert_eq!(err.to_string(), "no eligible key");
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn empty_pool_is_configuration_error() {
        let source = Arc::new(FakeSource::default());
        let pool = pool_with(&source, Vec::new(), 5.0);
        let err = pool.select(&none(), false).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got {err:?}");
        assert_eq!(pool.health().await.status, "unhealthy");
    }

    #[tokio::test(start_paused = true)]
    async fn cached_cost_is_trusted_until_ttl_expires() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 4.0),
            ("secret-2-xxxx", 0.0),
        ]));
        let pool = pool_with(&source, creds(2), 5.0);

        assert_eq!(pool.select(&none(), false).await.unwrap().alias, "key1");
        assert_eq!(pool.select(&none(), false).await.unwrap().alias, "key2");

        // Spend crosses the budget, but the cached snapshot is still fresh.
        source.set_cost("secret-1-xxxx", 6.0);
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(pool.select(&none(), false).await.unwrap().alias, "key1");
        assert_eq!(pool.select(&none(), false).await.unwrap().alias, "key2");

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(pool.select(&none(), false).await.unwrap().alias, "key2");
    }

    #[tokio::test]
    async fn concurrent_selection_is_evenly_distributed() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 0.0),
            ("secret-2-xxxx", 0.0),
            ("secret-3-xxxx", 0.0),
        ]));
        let pool = Arc::new(pool_with(&source, creds(3), 5.0));

        let mut handles = Vec::new();
        for _ in 0..30 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.select(&HashSet::new(), false).await.unwrap().alias
            }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 10), "{counts:?}");
    }

    #[tokio::test]
    async fn health_reflects_cached_spend() {
        let source = Arc::new(FakeSource::with_costs(&[
            ("secret-1-xxxx", 6.0),
            ("secret-2-xxxx", 1.0),
        ]));
        let pool = pool_with(&source, creds(2), 5.0);
        assert_eq!(pool.health().await.status, "healthy");

        pool.usage_report(false).await;
        let health = pool.health().await;
        assert_eq!(health.status, "degraded");
        let details = health.pool.unwrap();
        assert_eq!(details["credentials_exhausted"], 1);
        assert_eq!(details["credentials"][0]["key_mask"], "secr...xxxx");

        source.set_cost("secret-2-xxxx", 5.0);
        pool.usage_report(true).await;
        assert_eq!(pool.health().await.status, "unhealthy");
    }

    #[tokio::test]
    async fn usage_report_rows_follow_config_order() {
        let source = Arc::new(FakeSource::with_costs(&[("secret-2-xxxx", 5.5)]));
        let pool = pool_with(&source, creds(2), 5.0);

        let rows = pool.usage_report(false).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].alias, "key1");
        assert_eq!(rows[0].total_cost_usd, None);
        assert!(!rows[0].exhausted);
        assert_eq!(rows[1].total_cost_usd, Some(5.5));
        assert!(rows[1].exhausted);

        // Reporting does not disturb selection order.
        assert_eq!(pool.select(&none(), false).await.unwrap().alias, "key1");
    }
}
