//! Paginated fetch with credential rotation and capped backoff

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use key_pool::Pool;
use key_registry::Credential;
use provider::{ResponseClass, classify_status, parse_retry_after};
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderName};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use usage_ledger::{Ledger, UsageEvent};
use uuid::Uuid;

use crate::artifact::{artifact_slug, write_atomic};
use crate::error::FetchError;
use crate::sleeper::{Sleeper, TokioSleeper};

const JSON_ACCEPT: &str = "application/json; charset=UTF-8";
const MAX_ERROR_BODY: usize = 1024;
const DEFAULT_OUTPUT_DIR: &str = "data";

/// Tunables for one provider's paginated reads.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub provider: String,
    pub base_url: String,
    pub auth_header: String,
    /// Failed attempts allowed per page before giving up.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    pub max_pages: usize,
    /// Pause between successful pages.
    pub page_interval: Duration,
    /// Cost recorded for each successful page.
    pub page_cost_usd: f64,
    /// Where artifacts are written; `None` disables them.
    pub output_dir: Option<PathBuf>,
}

impl FetchSettings {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            auth_header: "x-apikey".to_string(),
            max_attempts: 5,
            base_delay: Duration::from_secs(20),
            max_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            max_pages: 10,
            page_interval: Duration::ZERO,
            page_cost_usd: 0.0,
            output_dir: Some(PathBuf::from(DEFAULT_OUTPUT_DIR)),
        }
    }
}

/// Result of a paginated fetch. Items collected before a failure are kept.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub fetch_id: String,
    pub items: Vec<Value>,
    /// Pages that returned 2xx with a JSON body.
    pub pages: usize,
    /// True when pagination ended on its own (no next link or empty batch).
    pub completed: bool,
    pub error: Option<FetchError>,
    pub artifact: Option<PathBuf>,
}

/// Identifies ledger rows written for one page.
struct PageContext<'a> {
    endpoint: &'a str,
    fetch_id: &'a str,
    page: usize,
}

pub struct FetchClient {
    http: reqwest::Client,
    pool: Arc<Pool>,
    ledger: Arc<Ledger>,
    settings: FetchSettings,
    auth_header: HeaderName,
    sleeper: Arc<dyn Sleeper>,
}

impl FetchClient {
    pub fn new(
        http: reqwest::Client,
        pool: Arc<Pool>,
        ledger: Arc<Ledger>,
        settings: FetchSettings,
    ) -> Result<Self, FetchError> {
        let auth_header = HeaderName::from_bytes(settings.auth_header.as_bytes())
            .map_err(|e| FetchError::Config(format!("auth_header {}: {e}", settings.auth_header)))?;
        if settings.max_attempts == 0 {
            return Err(FetchError::Config("max_attempts must be at least 1".into()));
        }
        Ok(Self {
            http,
            pool,
            ledger,
            settings,
            auth_header,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetch every page of `template` and collect the arrays under
    /// `resource_key`.
    ///
    /// `{name}` placeholders in the template are filled from `params`; the
    /// remaining params form the first page's query string. Later pages
    /// follow `links.next` verbatim.
    pub async fn fetch_paginated(
        &self,
        template: &str,
        params: &[(String, String)],
        resource_key: &str,
    ) -> FetchReport {
        let fetch_id = Uuid::new_v4().to_string();
        let endpoint = format!("GET {template}");
        let (path, query) = render_template(template, params);
        let mut url = format!("{}{}", self.settings.base_url.trim_end_matches('/'), path);

        let mut report = FetchReport {
            fetch_id: fetch_id.clone(),
            items: Vec::new(),
            pages: 0,
            completed: false,
            error: None,
            artifact: None,
        };
        let mut rejected: HashSet<String> = HashSet::new();

        info!(fetch_id = %fetch_id, endpoint = %endpoint, "starting paginated fetch");

        let mut credential = match self.pool.select(&rejected, false).await {
            Ok(credential) => credential,
            Err(e) => {
                error!(fetch_id = %fetch_id, error = %e, "no credential available for fetch");
                report.error = Some(FetchError::NoCredential(e.to_string()));
                return self.finish(report, &path, resource_key).await;
            }
        };

        for page in 1..=self.settings.max_pages {
            let ctx = PageContext {
                endpoint: &endpoint,
                fetch_id: &fetch_id,
                page,
            };
            let page_query: &[(String, String)] = if page == 1 { &query } else { &[] };

            let mut body = match self
                .fetch_page(&ctx, &url, page_query, &mut credential, &mut rejected)
                .await
            {
                Ok(body) => body,
                Err(e) => {
                    error!(fetch_id = %fetch_id, page, error = %e, "fetch stopped early");
                    metrics::counter!("meter_gate_fetch_failures_total", "kind" => e.kind())
                        .increment(1);
                    report.error = Some(e);
                    break;
                }
            };
            report.pages += 1;

            let batch = match body.get_mut(resource_key).map(Value::take) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            if batch.is_empty() {
                info!(fetch_id = %fetch_id, page, "empty batch, stopping pagination");
                report.completed = true;
                break;
            }
            info!(fetch_id = %fetch_id, page, items = batch.len(), "page received");
            report.items.extend(batch);

            let Some(next) = next_link(&body) else {
                report.completed = true;
                break;
            };
            if page == self.settings.max_pages {
                warn!(fetch_id = %fetch_id, max_pages = page, "page limit reached, stopping pagination");
                break;
            }
            let Some(next_url) = self.resolve_next(next) else {
                warn!(
                    fetch_id = %fetch_id,
                    next = %next,
                    "next link leaves the configured API origin, stopping pagination"
                );
                break;
            };
            url = next_url;
            debug!(fetch_id = %fetch_id, next = %url, "following next page");

            if !self.settings.page_interval.is_zero() {
                self.sleeper.sleep(self.settings.page_interval).await;
            }
        }

        self.finish(report, &path, resource_key).await
    }

    /// Fetch one page, rotating or backing off until it succeeds or the
    /// attempt budget runs out.
    ///
    /// `rejected` holds keys that failed authentication and persists across
    /// pages; keys that were throttled are only avoided for this page.
    async fn fetch_page(
        &self,
        ctx: &PageContext<'_>,
        url: &str,
        query: &[(String, String)],
        credential: &mut Credential,
        rejected: &mut HashSet<String>,
    ) -> Result<Value, FetchError> {
        let mut throttled: HashSet<String> = HashSet::new();
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let sent = self.send(url, query, credential).await;

            let failure = match sent {
                Err(e) => {
                    self.record(ctx, credential, None, false, started, Some(e.to_string()))
                        .await;
                    metrics::counter!("meter_gate_upstream_errors_total", "kind" => "transport")
                        .increment(1);
                    e.to_string()
                }
                Ok((status, retry_after, body)) => match classify_status(status) {
                    ResponseClass::Success => match serde_json::from_str::<Value>(&body) {
                        Ok(value) => {
                            self.record(ctx, credential, Some(status), true, started, None)
                                .await;
                            return Ok(value);
                        }
                        Err(e) => {
                            let message = format!("invalid JSON body: {e}");
                            self.record(
                                ctx,
                                credential,
                                Some(status),
                                false,
                                started,
                                Some(message.clone()),
                            )
                            .await;
                            metrics::counter!("meter_gate_upstream_errors_total", "kind" => "invalid_body")
                                .increment(1);
                            message
                        }
                    },
                    ResponseClass::AuthRejected => {
                        self.record(
                            ctx,
                            credential,
                            Some(status),
                            false,
                            started,
                            Some(format!("auth_error: {}", truncate(&body, MAX_ERROR_BODY))),
                        )
                        .await;
                        metrics::counter!("meter_gate_upstream_errors_total", "kind" => "auth")
                            .increment(1);
                        rejected.insert(credential.key().to_string());

                        let excluded: HashSet<String> = rejected.union(&throttled).cloned().collect();
                        match self.pool.select(&excluded, true).await {
                            Ok(next) => {
                                warn!(
                                    from = %credential.alias,
                                    to = %next.alias,
                                    key = %next.mask(),
                                    status,
                                    "credential rejected, rotating"
                                );
                                metrics::counter!("meter_gate_rotations_total", "reason" => "auth")
                                    .increment(1);
                                *credential = next;
                                continue;
                            }
                            Err(e) => {
                                error!(alias = %credential.alias, error = %e, "no replacement after auth error");
                                return Err(FetchError::Authentication(format!(
                                    "{} rejected with {status}: {e}",
                                    credential.alias
                                )));
                            }
                        }
                    }
                    ResponseClass::RateLimited => {
                        self.record(
                            ctx,
                            credential,
                            Some(status),
                            false,
                            started,
                            Some("rate_limited".to_string()),
                        )
                        .await;
                        metrics::counter!("meter_gate_upstream_errors_total", "kind" => "rate_limited")
                            .increment(1);
                        throttled.insert(credential.key().to_string());

                        let excluded: HashSet<String> = rejected.union(&throttled).cloned().collect();
                        if let Ok(next) = self.pool.select(&excluded, false).await {
                            warn!(
                                from = %credential.alias,
                                to = %next.alias,
                                key = %next.mask(),
                                "credential rate limited, rotating"
                            );
                            metrics::counter!("meter_gate_rotations_total", "reason" => "rate_limited")
                                .increment(1);
                            *credential = next;
                            continue;
                        }

                        attempt += 1;
                        if attempt >= self.settings.max_attempts {
                            return Err(FetchError::RateLimited { attempts: attempt });
                        }
                        let delay = backoff_delay(
                            retry_after.unwrap_or(self.settings.base_delay),
                            attempt - 1,
                            self.settings.max_delay,
                        );
                        warn!(
                            alias = %credential.alias,
                            delay_secs = delay.as_secs_f64(),
                            attempt,
                            max_attempts = self.settings.max_attempts,
                            "rate limited with no other key, backing off"
                        );
                        self.sleeper.sleep(delay).await;
                        continue;
                    }
                    ResponseClass::Failure => {
                        self.record(
                            ctx,
                            credential,
                            Some(status),
                            false,
                            started,
                            Some(truncate(&body, MAX_ERROR_BODY).to_string()),
                        )
                        .await;
                        metrics::counter!("meter_gate_upstream_errors_total", "kind" => "status")
                            .increment(1);
                        format!("status {status}")
                    }
                },
            };

            attempt += 1;
            if attempt >= self.settings.max_attempts {
                return Err(FetchError::Transient {
                    attempts: attempt,
                    last_error: failure,
                });
            }
            let delay = backoff_delay(self.settings.base_delay, attempt - 1, self.settings.max_delay);
            warn!(
                alias = %credential.alias,
                error = %failure,
                delay_secs = delay.as_secs_f64(),
                attempt,
                max_attempts = self.settings.max_attempts,
                "request failed, backing off"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    async fn send(
        &self,
        url: &str,
        query: &[(String, String)],
        credential: &Credential,
    ) -> reqwest::Result<(u16, Option<Duration>, String)> {
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, JSON_ACCEPT)
            .header(self.auth_header.clone(), credential.key())
            .timeout(self.settings.request_timeout);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await?;
        Ok((status, retry_after, body))
    }

    async fn record(
        &self,
        ctx: &PageContext<'_>,
        credential: &Credential,
        status: Option<u16>,
        success: bool,
        started: Instant,
        error: Option<String>,
    ) {
        let mut event = UsageEvent::attempt(&self.settings.provider, ctx.endpoint, "GET")
            .status(status)
            .success(success)
            .duration(started.elapsed())
            .metadata(json!({
                "key_alias": credential.alias,
                "key_mask": credential.mask(),
                "fetch_id": ctx.fetch_id,
                "page": ctx.page,
            }));
        if success {
            event = event.cost(self.settings.page_cost_usd);
        }
        if let Some(error) = error {
            event = event.error(error);
        }
        self.ledger.record(event).await;
    }

    /// Relative links are appended to `base_url`. Absolute links are only
    /// followed when they share its origin, so the key never leaves that host.
    fn resolve_next(&self, next: &str) -> Option<String> {
        if !next.starts_with("http") {
            return Some(format!("{}{}", self.settings.base_url.trim_end_matches('/'), next));
        }
        let base = Url::parse(&self.settings.base_url).ok()?;
        let target = Url::parse(next).ok()?;
        (base.origin() == target.origin()).then(|| next.to_string())
    }

    async fn finish(&self, mut report: FetchReport, path: &str, resource_key: &str) -> FetchReport {
        if let Some(dir) = &self.settings.output_dir {
            match write_atomic(dir, &artifact_slug(path), resource_key, &report.items).await {
                Ok(artifact) => report.artifact = Some(artifact),
                Err(e) => warn!(dir = %dir.display(), error = %e, "failed to write fetch artifact"),
            }
        }
        info!(
            fetch_id = %report.fetch_id,
            items = report.items.len(),
            pages = report.pages,
            completed = report.completed,
            "paginated fetch finished"
        );
        report
    }
}

/// Substitute `{name}` placeholders; unused params become query pairs.
fn render_template(template: &str, params: &[(String, String)]) -> (String, Vec<(String, String)>) {
    let mut path = template.to_string();
    let mut query = Vec::new();
    for (name, value) in params {
        let placeholder = format!("{{{name}}}");
        if path.contains(&placeholder) {
            path = path.replace(&placeholder, value);
        } else {
            query.push((name.clone(), value.clone()));
        }
    }
    (path, query)
}

fn next_link(body: &Value) -> Option<&str> {
    body.get("links")?
        .get("next")?
        .as_str()
        .filter(|next| !next.is_empty())
}

/// `min(base * 2^prior_failures, cap)`, saturating.
fn backoff_delay(base: Duration, prior_failures: u32, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(prior_failures).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
