//! Prometheus metrics exposition
//!
//! The library crates emit their own counters (selections, rotations,
//! upstream errors, budget blocks, ledger write failures). This module adds
//! the per-fetch series recorded by the binary:
//!
//! - `meter_gate_fetches_total` (counter): label `outcome`
//! - `meter_gate_fetch_items_total` (counter)
//! - `meter_gate_fetch_duration_seconds` (histogram): label `outcome`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use paged_fetch::FetchReport;

const FETCH_DURATION: &str = "meter_gate_fetch_duration_seconds";

/// Whole paginated fetches include backoff sleeps, so buckets run from 50ms
/// to 10 minutes.
const FETCH_DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(FETCH_DURATION.to_string()), FETCH_DURATION_BUCKETS)
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// `completed`, `truncated` (page limit reached), or the error kind.
pub fn fetch_outcome(report: &FetchReport) -> &'static str {
    match &report.error {
        Some(err) => err.kind(),
        None if report.completed => "completed",
        None => "truncated",
    }
}

/// Record one finished paginated fetch.
pub fn record_fetch(report: &FetchReport, duration_secs: f64) {
    let outcome = fetch_outcome(report);
    metrics::counter!("meter_gate_fetches_total", "outcome" => outcome).increment(1);
    metrics::counter!("meter_gate_fetch_items_total").increment(report.items.len() as u64);
    metrics::histogram!(FETCH_DURATION, "outcome" => outcome).record(duration_secs);
}
