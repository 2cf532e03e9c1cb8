//! Provider-side plumbing for metered APIs
//!
//! Defines the `UsageSource` trait that decouples the key pool from how a
//! credential's month-to-date spend is obtained. `HttpUsageSource` queries
//! the provider's account usage endpoint; tests substitute in-memory fakes.
//!
//! Also hosts the response classification shared by every caller that talks
//! to the provider: which statuses rotate credentials, which back off, and
//! how `Retry-After` is read.

pub mod classify;
pub mod http;

pub use classify::{ResponseClass, classify_status, parse_retry_after};
pub use http::HttpUsageSource;

use chrono::{DateTime, Utc};
use key_registry::Credential;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Month-to-date usage reported by the provider for one credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub total_cost_usd: f64,
    pub total_calls: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Health status reported for the /health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    /// Overall status: "healthy", "degraded", or "unhealthy"
    pub status: String,
    /// Pool details (per-credential spend, counts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<serde_json::Value>,
}

/// Errors from usage queries.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("usage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("usage endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid usage response: {0}")]
    InvalidBody(String),

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Source of per-credential usage snapshots.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn UsageSource>`).
pub trait UsageSource: Send + Sync {
    /// Query month-to-date usage for `credential`. Implementations perform
    /// exactly one upstream request per call; caching is the caller's job.
    fn fetch_usage<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<UsageSnapshot>> + Send + 'a>>;
}
