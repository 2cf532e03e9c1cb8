//! meter-gate
//!
//! Governs a pool of metered API keys:
//! 1. Picks a key under its monthly budget, round-robin
//! 2. Runs paginated reads that rotate keys on 401/403/429 and back off
//! 3. Records every attempt in a SQLite usage ledger
//! 4. Serves health, usage, monthly summary and Prometheus metrics

mod app;
mod cli;
mod config;
mod metrics;
mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usage_ledger::{BudgetEngine, Month};

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::status::StatusState;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let prometheus_handle = metrics::install_recorder();

    let cli = Cli::parse(std::env::args().skip(1))?;
    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        provider = %config.api.provider,
        base_url = %config.api.base_url,
        enforced_budgets = config.budget.len(),
        ledger_enabled = config.ledger.enabled,
        "configuration loaded"
    );

    let app = App::build(&config)?;

    match cli.command {
        Command::Usage { refresh } => {
            app.require_credentials()?;
            let rows = app.pool.usage_report(refresh).await;
            print_json(&serde_json::json!({ "credentials": rows }))
        }
        Command::Summary { month } => {
            let month = month.unwrap_or_else(Month::current);
            let providers = app
                .budget
                .monthly_summary(month)
                .await
                .context("failed to read usage ledger")?;
            print_json(&serde_json::json!({
                "month": month.to_string(),
                "providers": providers,
            }))
        }
        Command::Check {
            provider,
            endpoint,
            cost,
        } => {
            let decision = app
                .budget
                .check(&provider, &endpoint, cost)
                .await
                .context("budget check failed")?;
            print_json(&decision)
        }
        Command::Fetch {
            template,
            resource_key,
            params,
        } => {
            app.require_credentials()?;
            run_fetch(&app, &template, &resource_key, &params).await
        }
        Command::Serve => {
            app.require_credentials()?;
            serve(app, &config, prometheus_handle).await
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

async fn run_fetch(
    app: &App,
    template: &str,
    resource_key: &str,
    params: &[(String, String)],
) -> Result<()> {
    let started = Instant::now();
    let report = app
        .fetch
        .fetch_paginated(template, params, resource_key)
        .await;
    metrics::record_fetch(&report, started.elapsed().as_secs_f64());

    print_json(&serde_json::json!({
        "fetch_id": report.fetch_id,
        "items": report.items.len(),
        "pages": report.pages,
        "completed": report.completed,
        "outcome": metrics::fetch_outcome(&report),
        "error": report.error.as_ref().map(ToString::to_string),
        "artifact": report.artifact,
    }))?;

    if let Some(err) = report.error {
        bail!("fetch {} failed: {err}", report.fetch_id);
    }
    Ok(())
}

async fn serve(
    app: App,
    config: &Config,
    prometheus: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<()> {
    let mut tasks = Vec::new();

    if config.usage_cache.refresh_interval_secs > 0 {
        let interval = Duration::from_secs(config.usage_cache.refresh_interval_secs);
        info!(interval_secs = interval.as_secs(), "starting background usage refresh");
        tasks.push(key_pool::spawn_refresh_task(Arc::clone(&app.pool), interval));
    }

    log_summary(&app.budget).await;
    if config.server.summary_interval_secs > 0 {
        tasks.push(spawn_summary_task(
            Arc::clone(&app.budget),
            Duration::from_secs(config.server.summary_interval_secs),
        ));
    }

    let router = status::build_router(StatusState {
        pool: Arc::clone(&app.pool),
        budget: Arc::clone(&app.budget),
        prometheus,
        started_at: Instant::now(),
    });

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "status endpoints listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for task in tasks {
        task.abort();
    }

    match result {
        Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "status server failed");
            Err(e).context("status server failed")
        }
    }
}

/// Log this month's ledger totals, one line per provider.
async fn log_summary(budget: &BudgetEngine) {
    let month = Month::current();
    match budget.monthly_summary(month).await {
        Ok(summary) => {
            for (provider, totals) in summary {
                info!(
                    month = %month,
                    provider = %provider,
                    total_calls = totals.total_calls,
                    successful_calls = totals.successful_calls,
                    blocked_calls = totals.blocked_calls,
                    cost_usd = totals.cost_usd,
                    budget_usd = budget.budget_for(&provider),
                    "monthly usage summary"
                );
            }
        }
        Err(e) => warn!(month = %month, error = %e, "failed to read monthly usage summary"),
    }
}

fn spawn_summary_task(budget: Arc<BudgetEngine>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            log_summary(&budget).await;
        }
    })
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
