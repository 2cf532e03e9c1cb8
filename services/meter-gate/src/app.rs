//! Wiring of the ledger, budget engine, usage source, pool and fetch client

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use key_pool::{Pool, SnapshotCache};
use paged_fetch::FetchClient;
use provider::HttpUsageSource;
use tracing::{info, warn};
use usage_ledger::{BudgetEngine, Ledger};

use crate::config::Config;

/// Everything a command needs, built once per process.
pub struct App {
    pub ledger: Arc<Ledger>,
    pub budget: Arc<BudgetEngine>,
    pub pool: Arc<Pool>,
    pub fetch: FetchClient,
}

impl App {
    pub fn build(config: &Config) -> Result<Self> {
        let ledger = Arc::new(open_ledger(config));
        let budget = Arc::new(BudgetEngine::new(
            Arc::clone(&ledger),
            config.budget.clone(),
        ));

        let http = reqwest::Client::new();
        let source = HttpUsageSource::new(
            http.clone(),
            &config.api.provider,
            &config.api.usage_url,
            &config.api.auth_header,
            Arc::clone(&ledger),
        )
        .context("invalid usage endpoint configuration")?
        .with_timeout(Duration::from_secs(config.api.request_timeout_secs));

        let credentials = config.credentials();
        info!(
            credentials = credentials.len(),
            monthly_budget_usd = config.credentials.monthly_budget_usd,
            ttl_secs = config.usage_cache.ttl_seconds,
            "credential pool loaded"
        );

        let cache = SnapshotCache::new(Arc::new(source), config.usage_ttl());
        let pool = Arc::new(Pool::new(
            credentials,
            config.credentials.monthly_budget_usd,
            cache,
        ));

        let fetch = FetchClient::new(
            http,
            Arc::clone(&pool),
            Arc::clone(&ledger),
            config.fetch_settings(),
        )
        .context("invalid fetch configuration")?;

        Ok(Self {
            ledger,
            budget,
            pool,
            fetch,
        })
    }

    /// Fail start-up when no credential is configured.
    pub fn require_credentials(&self) -> Result<()> {
        if self.pool.credentials().is_empty() {
            bail!(
                "no API keys configured: set credentials.multi, credentials.single, \
                 credentials.keys_file, METERED_API_KEYS or METERED_API_KEY"
            );
        }
        Ok(())
    }
}

/// A ledger that cannot be opened degrades to a disabled one.
fn open_ledger(config: &Config) -> Ledger {
    if !config.ledger.enabled {
        info!("usage ledger disabled by configuration");
        return Ledger::disabled();
    }
    match Ledger::open(&config.ledger.path) {
        Ok(ledger) => ledger,
        Err(e) => {
            warn!(
                path = %config.ledger.path.display(),
                error = %e,
                "failed to open usage ledger, continuing without it"
            );
            Ledger::disabled()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn load(dir: &Path, extra: &str) -> Config {
        let contents = format!(
            r#"
[ledger]
path = "{}"

[api]
base_url = "https://api.example.com"
usage_url = "https://api.example.com/account/usage"
{extra}
"#,
            dir.join("usage.db").display()
        );
        toml::from_str(&contents).unwrap()
    }

    #[test]
    fn build_opens_ledger_and_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load(dir.path(), "");
        config.credentials.multi = Some(common::Secret::new("a:aaaa1111,b:bbbb2222".to_string()));

        let app = App::build(&config).unwrap();
        assert!(app.ledger.is_enabled());
        assert_eq!(app.pool.credentials().len(), 2);
        assert_eq!(app.pool.budget_usd(), 5.0);
        assert_eq!(app.fetch.settings().provider, "aeroapi");
        app.require_credentials().unwrap();
    }

    #[test]
    fn empty_pool_fails_require_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(&load(dir.path(), "")).unwrap();
        let err = app.require_credentials().unwrap_err().to_string();
        assert!(err.contains("no API keys configured"), "got: {err}");
    }

    #[test]
    fn disabled_ledger_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load(dir.path(), "");
        config.ledger.enabled = false;

        let app = App::build(&config).unwrap();
        assert!(!app.ledger.is_enabled());
        assert!(!dir.path().join("usage.db").exists());
    }

    #[test]
    fn unopenable_ledger_falls_back_to_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let mut config = load(dir.path(), "");
        config.ledger.path = blocker.join("usage.db");

        let app = App::build(&config).unwrap();
        assert!(!app.ledger.is_enabled());
    }

    #[test]
    fn invalid_auth_header_fails_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(dir.path(), "auth_header = \"bad header\"");
        assert!(App::build(&config).is_err());
    }
}
