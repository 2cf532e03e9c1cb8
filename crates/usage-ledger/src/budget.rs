//! Monthly budget checks against the usage ledger

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::event::UsageEvent;
use crate::month::Month;
use crate::store::{Ledger, ProviderSummary};

/// Spend limit for one provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BudgetPolicy {
    pub monthly_usd: f64,
    /// When false the budget is reported but never blocks.
    #[serde(default = "default_enforce")]
    pub enforce: bool,
    /// Per-call cost for endpoints missing from `endpoint_costs`.
    #[serde(default)]
    pub default_cost_per_call_usd: Option<f64>,
    /// Exact endpoint label → per-call cost.
    #[serde(default)]
    pub endpoint_costs: HashMap<String, f64>,
}

fn default_enforce() -> bool {
    true
}

impl BudgetPolicy {
    pub fn new(monthly_usd: f64) -> Self {
        Self {
            monthly_usd,
            enforce: true,
            default_cost_per_call_usd: None,
            endpoint_costs: HashMap::new(),
        }
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub provider: String,
    pub endpoint: String,
    pub month_cost_usd: f64,
    pub estimated_cost_usd: f64,
    pub projected_cost_usd: f64,
    /// Infinite for providers without an enforced policy.
    pub budget_usd: f64,
    pub reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error("{}", denial_reason(.0))]
    Exceeded(BudgetDecision),

    #[error("unable to read monthly spend: {0}")]
    Ledger(#[from] LedgerError),
}

fn denial_reason(decision: &BudgetDecision) -> &str {
    decision.reason.as_deref().unwrap_or("budget exceeded")
}

/// Decides whether a metered call may proceed.
#[derive(Debug)]
pub struct BudgetEngine {
    ledger: Arc<Ledger>,
    policies: HashMap<String, BudgetPolicy>,
}

impl BudgetEngine {
    pub fn new(ledger: Arc<Ledger>, policies: HashMap<String, BudgetPolicy>) -> Self {
        Self { ledger, policies }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn policy(&self, provider: &str) -> Option<&BudgetPolicy> {
        self.policies.get(provider)
    }

    /// Monthly limit for `provider`, or infinity when it has no policy.
    pub fn budget_for(&self, provider: &str) -> f64 {
        self.policies
            .get(provider)
            .map_or(f64::INFINITY, |policy| policy.monthly_usd)
    }

    /// Per-call cost: exact endpoint entry, then the provider default, then
    /// the caller's estimate, then zero.
    pub fn endpoint_cost(&self, provider: &str, endpoint: &str, estimate: Option<f64>) -> f64 {
        let policy = self.policies.get(provider);
        let cost = policy
            .and_then(|p| p.endpoint_costs.get(endpoint).copied())
            .or_else(|| policy.and_then(|p| p.default_cost_per_call_usd))
            .or(estimate)
            .unwrap_or(0.0);
        if cost.is_finite() && cost > 0.0 { cost } else { 0.0 }
    }

    /// Check a prospective call against this month's spend.
    ///
    /// Fails when the ledger cannot be read; callers must not treat that as
    /// permission to proceed.
    pub async fn check(
        &self,
        provider: &str,
        endpoint: &str,
        estimate: Option<f64>,
    ) -> Result<BudgetDecision, BudgetError> {
        let call_cost = self.endpoint_cost(provider, endpoint, estimate);
        let Some(policy) = self.policies.get(provider) else {
            return Ok(BudgetDecision {
                allowed: true,
                provider: provider.to_string(),
                endpoint: endpoint.to_string(),
                month_cost_usd: 0.0,
                estimated_cost_usd: call_cost,
                projected_cost_usd: call_cost,
                budget_usd: f64::INFINITY,
                reason: None,
            });
        };

        let budget = policy.monthly_usd;
        let month_cost = self
            .ledger
            .monthly_cost(provider, Month::current())
            .await?;
        let projected = month_cost + call_cost;
        let allowed = !policy.enforce || projected <= budget;

        let reason = (!allowed).then(|| {
            format!(
                "{provider} budget exceeded for month: current=${month_cost:.4}, \
                 cost=${call_cost:.4}, projected=${projected:.4}, budget=${budget:.4}"
            )
        });

        debug!(
            provider,
            endpoint,
            month_cost,
            call_cost,
            projected,
            budget,
            allowed,
            "budget check"
        );

        Ok(BudgetDecision {
            allowed,
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            month_cost_usd: month_cost,
            estimated_cost_usd: call_cost,
            projected_cost_usd: projected,
            budget_usd: budget,
            reason,
        })
    }

    /// Like [`check`](Self::check), but a denial records a blocked ledger
    /// row and is returned as [`BudgetError::Exceeded`].
    pub async fn enforce_or_raise(
        &self,
        provider: &str,
        endpoint: &str,
        estimate: Option<f64>,
    ) -> Result<BudgetDecision, BudgetError> {
        let decision = self.check(provider, endpoint, estimate).await?;
        if decision.allowed {
            return Ok(decision);
        }

        let reason = denial_reason(&decision).to_string();
        self.ledger
            .record(UsageEvent::blocked(
                provider,
                endpoint,
                decision.estimated_cost_usd,
                reason.clone(),
            ))
            .await;
        metrics::counter!("meter_gate_budget_blocked_total", "provider" => provider.to_string())
            .increment(1);
        warn!(provider, endpoint, reason = %reason, "metered call blocked by budget");

        Err(BudgetError::Exceeded(decision))
    }

    /// Ledger totals for `month`, with a zero row for every budgeted
    /// provider that has no activity yet.
    pub async fn monthly_summary(
        &self,
        month: Month,
    ) -> Result<BTreeMap<String, ProviderSummary>, LedgerError> {
        let mut summary = self.ledger.monthly_summary(month).await?;
        for provider in self.policies.keys() {
            summary.entry(provider.clone()).or_default();
        }
        Ok(summary)
    }
}
