//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys may live in the TOML, in `keys_file`, or in METERED_API_KEYS /
//! METERED_API_KEY. They are wrapped in `Secret` as soon as they are read.

use common::Secret;
use key_registry::Credential;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use usage_ledger::BudgetPolicy;

const ENV_KEYS: &str = "METERED_API_KEYS";
const ENV_KEY: &str = "METERED_API_KEY";
const ENV_MONTHLY_BUDGET: &str = "METERED_API_MONTHLY_BUDGET_USD";
const ENV_CACHE_TTL: &str = "METERED_API_USAGE_CACHE_TTL_SECONDS";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub usage_cache: UsageCacheConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub api: ApiConfig,
    /// Enforced providers, keyed by provider name.
    #[serde(default)]
    pub budget: HashMap<String, BudgetPolicy>,
    #[serde(default)]
    pub server: ServerConfig,
}

/// API key sources and the per-key selector ceiling
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub multi: Option<Secret<String>>,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub single: Option<Secret<String>>,
    /// File with the same syntax as `multi`
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    #[serde(default = "default_monthly_budget")]
    pub monthly_budget_usd: f64,
}

/// Usage snapshot cache settings
#[derive(Debug, Deserialize)]
pub struct UsageCacheConfig {
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// 0 disables the background refresh task
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

/// Usage ledger settings
#[derive(Debug, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

/// Metered API endpoints and retry policy
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: String,
    pub usage_url: String,
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub page_interval_secs: u64,
    #[serde(default)]
    pub page_cost_usd: f64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// false keeps fetched items in memory only
    #[serde(default = "default_true")]
    pub write_artifacts: bool,
}

/// Status listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(Secret::new))
}

fn default_monthly_budget() -> f64 {
    5.0
}

fn default_ttl() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/usage_metrics.db")
}

fn default_provider() -> String {
    "aeroapi".to_string()
}

fn default_auth_header() -> String {
    "x-apikey".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    20
}

fn default_max_delay() -> u64 {
    60
}

fn default_timeout() -> u64 {
    30
}

fn default_max_pages() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9095))
}

fn default_summary_interval() -> u64 {
    3600
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            multi: None,
            single: None,
            keys_file: None,
            monthly_budget_usd: default_monthly_budget(),
        }
    }
}

impl Default for UsageCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            refresh_interval_secs: 0,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_ledger_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            summary_interval_secs: default_summary_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Multi-key resolution order:
    /// 1. METERED_API_KEYS env var
    /// 2. keys_file path from config
    /// 3. credentials.multi from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(keys) = std::env::var(ENV_KEYS) {
            config.credentials.multi = Some(Secret::new(keys));
        } else if let Some(ref keys_file) = config.credentials.keys_file {
            let keys = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            config.credentials.multi = Some(Secret::new(keys));
        }

        if let Ok(key) = std::env::var(ENV_KEY) {
            config.credentials.single = Some(Secret::new(key));
        }

        if let Ok(raw) = std::env::var(ENV_MONTHLY_BUDGET) {
            config.credentials.monthly_budget_usd = raw.trim().parse().map_err(|_| {
                common::Error::Config(format!("{ENV_MONTHLY_BUDGET} must be a number, got: {raw}"))
            })?;
        }

        if let Ok(raw) = std::env::var(ENV_CACHE_TTL) {
            config.usage_cache.ttl_seconds = raw.trim().parse().map_err(|_| {
                common::Error::Config(format!(
                    "{ENV_CACHE_TTL} must be a whole number of seconds, got: {raw}"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        for (name, url) in [("base_url", &self.api.base_url), ("usage_url", &self.api.usage_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        for (name, value) in [
            ("max_attempts", u64::from(self.api.max_attempts)),
            ("request_timeout_secs", self.api.request_timeout_secs),
            ("max_delay_secs", self.api.max_delay_secs),
            ("max_pages", self.api.max_pages as u64),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        check_amount("credentials.monthly_budget_usd", self.credentials.monthly_budget_usd)?;
        check_amount("api.page_cost_usd", self.api.page_cost_usd)?;

        for (provider, policy) in &self.budget {
            check_amount(&format!("budget.{provider}.monthly_usd"), policy.monthly_usd)?;
            if let Some(cost) = policy.default_cost_per_call_usd {
                check_amount(&format!("budget.{provider}.default_cost_per_call_usd"), cost)?;
            }
            for (endpoint, cost) in &policy.endpoint_costs {
                if !is_endpoint_label(endpoint) {
                    return Err(common::Error::Config(format!(
                        "budget.{provider}.endpoint_costs key must look like \"GET /path\", got: {endpoint}"
                    )));
                }
                check_amount(&format!("budget.{provider}.endpoint_costs.{endpoint}"), *cost)?;
            }
        }

        Ok(())
    }

    /// Parsed, deduplicated key list. May be empty.
    pub fn credentials(&self) -> Vec<Credential> {
        key_registry::load_credentials(
            self.credentials.multi.as_ref().map(|s| s.expose().as_str()),
            self.credentials.single.as_ref().map(|s| s.expose().as_str()),
        )
    }

    pub fn usage_ttl(&self) -> Duration {
        Duration::from_secs(self.usage_cache.ttl_seconds)
    }

    /// Paginated fetch settings derived from `[api]`.
    pub fn fetch_settings(&self) -> paged_fetch::FetchSettings {
        let api = &self.api;
        let mut settings = paged_fetch::FetchSettings::new(&api.provider, &api.base_url);
        settings.auth_header = api.auth_header.clone();
        settings.max_attempts = api.max_attempts;
        settings.base_delay = Duration::from_secs(api.base_delay_secs);
        settings.max_delay = Duration::from_secs(api.max_delay_secs);
        settings.request_timeout = Duration::from_secs(api.request_timeout_secs);
        settings.max_pages = api.max_pages;
        settings.page_interval = Duration::from_secs(api.page_interval_secs);
        settings.page_cost_usd = api.page_cost_usd;
        settings.output_dir = api.write_artifacts.then(|| api.output_dir.clone());
        settings
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("meter-gate.toml")
    }
}

fn check_amount(name: &str, value: f64) -> common::Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must be a finite amount >= 0, got: {value}"
        )))
    }
}

/// `METHOD /path` with an upper-case method.
fn is_endpoint_label(label: &str) -> bool {
    match label.split_once(' ') {
        Some((method, path)) => {
            !method.is_empty()
                && method.chars().all(|c| c.is_ascii_uppercase())
                && !path.trim().is_empty()
        }
        None => false,
    }
}
