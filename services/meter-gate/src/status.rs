//! Status HTTP surface for `serve`
//!
//! - `GET /health` pool health from cached snapshots, 503 when unhealthy
//! - `GET /usage?refresh=true` per-credential usage report
//! - `GET /summary?month=YYYY-MM` ledger totals per provider
//! - `GET /metrics` Prometheus text exposition

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use key_pool::Pool;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::error;
use usage_ledger::{BudgetEngine, Month};

/// Cap on concurrently served status requests.
const MAX_CONCURRENT_REQUESTS: usize = 64;

#[derive(Clone)]
pub struct StatusState {
    pub pool: Arc<Pool>,
    pub budget: Arc<BudgetEngine>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

pub fn build_router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/usage", get(usage_handler))
        .route("/summary", get(summary_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            MAX_CONCURRENT_REQUESTS,
        ))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct UsageParams {
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryParams {
    month: Option<String>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn health_handler(State(state): State<StatusState>) -> Response {
    let health = state.pool.health().await;
    let status_code = if health.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    json_response(
        status_code,
        serde_json::json!({
            "status": health.status,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "ledger_enabled": state.budget.ledger().is_enabled(),
            "pool": health.pool,
        }),
    )
}

async fn usage_handler(
    State(state): State<StatusState>,
    Query(params): Query<UsageParams>,
) -> Response {
    let rows = state.pool.usage_report(params.refresh).await;
    json_response(StatusCode::OK, serde_json::json!({ "credentials": rows }))
}

async fn summary_handler(
    State(state): State<StatusState>,
    Query(params): Query<SummaryParams>,
) -> Response {
    let month = match params.month.as_deref() {
        None => Month::current(),
        Some(raw) => match raw.parse::<Month>() {
            Ok(month) => month,
            Err(e) => {
                return json_response(StatusCode::BAD_REQUEST, serde_json::json!({ "error": e }));
            }
        },
    };

    match state.budget.monthly_summary(month).await {
        Ok(providers) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "month": month.to_string(),
                "providers": providers,
            }),
        ),
        Err(e) => {
            error!(month = %month, error = %e, "failed to read monthly summary");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }),
            )
        }
    }
}

async fn metrics_handler(State(state): State<StatusState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use key_pool::SnapshotCache;
    use key_registry::Credential;
    use provider::{UsageSnapshot, UsageSource};
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;
    use tower::ServiceExt;
    use usage_ledger::{BudgetPolicy, Ledger, UsageEvent};

    /// Usage source with fixed per-key costs; unknown keys fail.
    struct StaticUsage(HashMap<String, f64>);

    impl UsageSource for StaticUsage {
        fn fetch_usage<'a>(
            &'a self,
            credential: &'a Credential,
        ) -> Pin<Box<dyn Future<Output = provider::Result<UsageSnapshot>> + Send + 'a>> {
            Box::pin(async move {
                match self.0.get(credential.key()) {
                    Some(cost) => Ok(UsageSnapshot {
                        total_cost_usd: *cost,
                        total_calls: 3,
                        fetched_at: chrono::Utc::now(),
                    }),
                    None => Err(provider::ProviderError::Status {
                        status: 500,
                        body: "unknown key".into(),
                    }),
                }
            })
        }
    }

    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn test_state(costs: &[(&str, f64)], ledger: Ledger) -> StatusState {
        let source = StaticUsage(costs.iter().map(|(k, c)| (k.to_string(), *c)).collect());
        let credentials = vec![
            Credential::new("primary", "key-primary-1111"),
            Credential::new("backup", "key-backup-2222"),
        ];
        let cache = SnapshotCache::new(Arc::new(source), Duration::from_secs(600));
        let ledger = Arc::new(ledger);
        let mut policies = HashMap::new();
        policies.insert("x".to_string(), BudgetPolicy::new(10.0));

        StatusState {
            pool: Arc::new(Pool::new(credentials, 5.0, cache)),
            budget: Arc::new(BudgetEngine::new(ledger, policies)),
            prometheus: test_prometheus_handle(),
            started_at: Instant::now(),
        }
    }

    async fn get_json(state: StatusState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_is_healthy_with_unknown_usage() {
        let state = test_state(&[], Ledger::disabled());
        let (status, body) = get_json(state, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["ledger_enabled"], false);
        assert_eq!(body["pool"]["credentials_total"], 2);
        assert_eq!(body["pool"]["credentials_unknown"], 2);
    }

    #[tokio::test]
    async fn health_reports_degraded_and_unhealthy() {
        let state = test_state(
            &[("key-primary-1111", 6.0), ("key-backup-2222", 1.0)],
            Ledger::disabled(),
        );
        state.pool.usage_report(true).await;
        let (status, body) = get_json(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");

        let state = test_state(
            &[("key-primary-1111", 6.0), ("key-backup-2222", 5.0)],
            Ledger::disabled(),
        );
        state.pool.usage_report(true).await;
        let (status, body) = get_json(state, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["pool"]["credentials_exhausted"], 2);
    }

    #[tokio::test]
    async fn usage_lists_credentials_without_keys() {
        let state = test_state(&[("key-primary-1111", 1.25)], Ledger::disabled());
        let (status, body) = get_json(state, "/usage?refresh=true").await;

        assert_eq!(status, StatusCode::OK);
        let rows = body["credentials"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["alias"], "primary");
        assert_eq!(rows[0]["total_cost_usd"], 1.25);
        assert_eq!(rows[0]["exhausted"], false);
        assert!(rows[1]["total_cost_usd"].is_null());
        assert!(!body.to_string().contains("key-primary-1111"));
    }

    #[tokio::test]
    async fn summary_includes_enforced_providers() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("usage.db")).unwrap();
        ledger
            .record(
                UsageEvent::attempt("aeroapi", "GET /flights/{ident}", "GET")
                    .status(Some(200))
                    .success(true)
                    .cost(0.5),
            )
            .await;
        let state = test_state(&[], ledger);

        let (status, body) = get_json(state, "/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["month"], Month::current().to_string());
        assert_eq!(body["providers"]["aeroapi"]["total_calls"], 1);
        assert_eq!(body["providers"]["aeroapi"]["cost_usd"], 0.5);
        assert_eq!(body["providers"]["x"]["total_calls"], 0);
    }

    #[tokio::test]
    async fn summary_for_other_month_is_empty() {
        let state = test_state(&[], Ledger::disabled());
        let (status, body) = get_json(state, "/summary?month=2001-01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["month"], "2001-01");
        assert_eq!(body["providers"]["x"]["cost_usd"], 0.0);
    }

    #[tokio::test]
    async fn summary_rejects_bad_month() {
        let state = test_state(&[], Ledger::disabled());
        let (status, body) = get_json(state, "/summary?month=2026-13").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("2026-13"));
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let state = test_state(&[], Ledger::disabled());
        let response = build_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4; charset=utf-8");
    }
}
