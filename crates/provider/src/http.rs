//! HTTP usage source backed by the provider's account usage endpoint

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use key_registry::Credential;
use reqwest::header::{ACCEPT, HeaderName};
use serde_json::{Value, json};
use tracing::{debug, warn};
use usage_ledger::{Ledger, Month, UsageEvent};

use crate::{ProviderError, Result, UsageSnapshot, UsageSource};

const WINDOW_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Queries `GET {usage_url}?start=..&end=..&all_keys=false` with the
/// credential in `auth_header`, recording every query to the ledger at zero
/// cost.
pub struct HttpUsageSource {
    client: reqwest::Client,
    provider: String,
    usage_url: String,
    endpoint_label: String,
    auth_header: HeaderName,
    timeout: Duration,
    ledger: Arc<Ledger>,
}

impl HttpUsageSource {
    pub fn new(
        client: reqwest::Client,
        provider: impl Into<String>,
        usage_url: impl Into<String>,
        auth_header: &str,
        ledger: Arc<Ledger>,
    ) -> Result<Self> {
        let usage_url = usage_url.into();
        let parsed = reqwest::Url::parse(&usage_url)
            .map_err(|e| ProviderError::Config(format!("usage_url {usage_url}: {e}")))?;
        let auth_header = HeaderName::from_bytes(auth_header.as_bytes())
            .map_err(|e| ProviderError::Config(format!("auth_header {auth_header}: {e}")))?;

        Ok(Self {
            client,
            provider: provider.into(),
            endpoint_label: format!("GET {}", parsed.path()),
            usage_url,
            auth_header,
            timeout: DEFAULT_TIMEOUT,
            ledger,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query(&self, credential: &Credential) -> Result<UsageSnapshot> {
        let now = Utc::now();
        let window_start = Month::of(now).start().format(WINDOW_FORMAT).to_string();
        let window_end = now.format(WINDOW_FORMAT).to_string();
        let mut metadata = json!({
            "key_alias": credential.alias,
            "key_mask": credential.mask(),
            "window_start": window_start,
            "window_end": window_end,
        });

        let started = Instant::now();
        let response = self
            .client
            .get(&self.usage_url)
            .header(ACCEPT, "application/json; charset=UTF-8")
            .header(self.auth_header.clone(), credential.key())
            .query(&[
                ("start", window_start.as_str()),
                ("end", window_end.as_str()),
                ("all_keys", "false"),
            ])
            .timeout(self.timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.record(None, false, started, Some(e.to_string()), metadata)
                    .await;
                warn!(alias = %credential.alias, key = %credential.mask(), error = %e, "usage request failed");
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                self.record(Some(status), false, started, Some(e.to_string()), metadata)
                    .await;
                return Err(e.into());
            }
        };

        if !(200..300).contains(&status) {
            self.record(Some(status), false, started, Some(body.clone()), metadata)
                .await;
            warn!(
                alias = %credential.alias,
                key = %credential.mask(),
                status,
                "usage endpoint returned error"
            );
            return Err(ProviderError::Status { status, body });
        }

        let payload: Value = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(e) => {
                self.record(Some(status), false, started, Some(e.to_string()), metadata)
                    .await;
                return Err(ProviderError::InvalidBody(e.to_string()));
            }
        };

        let total_cost_usd = as_float(payload.get("total_cost"));
        let total_calls = as_count(payload.get("total_calls"));
        metadata["total_cost_usd"] = json!(total_cost_usd);
        metadata["total_calls"] = json!(total_calls);
        self.record(Some(status), true, started, None, metadata).await;

        debug!(
            alias = %credential.alias,
            key = %credential.mask(),
            total_cost_usd,
            total_calls,
            "usage snapshot fetched"
        );
        Ok(UsageSnapshot {
            total_cost_usd,
            total_calls,
            fetched_at: Utc::now(),
        })
    }

    async fn record(
        &self,
        status: Option<u16>,
        success: bool,
        started: Instant,
        error: Option<String>,
        metadata: Value,
    ) {
        let mut event = UsageEvent::attempt(&self.provider, &self.endpoint_label, "GET")
            .status(status)
            .success(success)
            .duration(started.elapsed())
            .metadata(metadata);
        if let Some(error) = error {
            event = event.error(error);
        }
        self.ledger.record(event).await;
    }
}

impl UsageSource for HttpUsageSource {
    fn fetch_usage<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<UsageSnapshot>> + Send + 'a>> {
        Box::pin(self.query(credential))
    }
}

/// Numbers or numeric strings; anything else counts as zero.
fn as_float(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v: &f64| v.is_finite()).unwrap_or(0.0)
}

fn as_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
