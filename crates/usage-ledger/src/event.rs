//! Ledger event types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One row of the usage ledger.
///
/// Built with [`UsageEvent::attempt`] or [`UsageEvent::blocked`] and then
/// refined with the builder methods before being handed to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEvent {
    pub provider: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: Option<u16>,
    pub success: bool,
    pub blocked: bool,
    pub duration_ms: Option<f64>,
    pub estimated_cost_usd: f64,
    pub error: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// An event read back from the ledger together with its row id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: UsageEvent,
}

impl UsageEvent {
    /// A call attempt that has not yet been marked successful.
    pub fn attempt(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            status_code: None,
            success: false,
            blocked: false,
            duration_ms: None,
            estimated_cost_usd: 0.0,
            error: None,
            metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    /// A budget denial. Blocked rows never count toward monthly spend.
    pub fn blocked(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        cost_usd: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            blocked: true,
            duration_ms: Some(0.0),
            estimated_cost_usd: sanitize_cost(cost_usd),
            error: Some(reason.into()),
            ..Self::attempt(provider, endpoint, "BUDGET")
        }
    }

    pub fn status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(elapsed.as_secs_f64() * 1000.0);
        self
    }

    pub fn cost(mut self, cost_usd: f64) -> Self {
        self.estimated_cost_usd = sanitize_cost(cost_usd);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Non-finite or negative costs are stored as zero.
fn sanitize_cost(cost_usd: f64) -> f64 {
    if cost_usd.is_finite() && cost_usd > 0.0 {
        cost_usd
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attempt_defaults() {
        let event = UsageEvent::attempt("aeroapi", "GET /flights", "GET");
        assert!(!event.success);
        assert!(!event.blocked);
        assert_eq!(event.estimated_cost_usd, 0.0);
        assert_eq!(event.metadata, json!({}));
        assert!(event.status_code.is_none());
    }

    #[test]
    fn blocked_event_shape() {
        let event = UsageEvent::blocked("aeroapi", "GET /flights", 0.5, "over budget");
        assert_eq!(event.method, "BUDGET");
        assert!(event.blocked);
        assert!(!event.success);
        assert_eq!(event.status_code, None);
        assert_eq!(event.duration_ms, Some(0.0));
        assert_eq!(event.estimated_cost_usd, 0.5);
        assert_eq!(event.error.as_deref(), Some("over budget"));
    }

    #[test]
    fn builder_sets_fields() {
        let event = UsageEvent::attempt("p", "e", "GET")
            .status(Some(200))
            .success(true)
            .duration(Duration::from_millis(250))
            .cost(0.01)
            .metadata(json!({"page": 1}));
        assert_eq!(event.status_code, Some(200));
        assert!(event.success);
        assert_eq!(event.duration_ms, Some(250.0));
        assert_eq!(event.estimated_cost_usd, 0.01);
        assert_eq!(event.metadata["page"], 1);
    }

    #[test]
    fn invalid_costs_become_zero() {
        assert_eq!(UsageEvent::attempt("p", "e", "GET").cost(f64::NAN).estimated_cost_usd, 0.0);
        assert_eq!(UsageEvent::attempt("p", "e", "GET").cost(-1.0).estimated_cost_usd, 0.0);
        assert_eq!(
            UsageEvent::attempt("p", "e", "GET").cost(f64::INFINITY).estimated_cost_usd,
            0.0
        );
    }
}
