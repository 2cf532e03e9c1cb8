//! SQLite-backed usage ledger

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::event::{StoredEvent, UsageEvent};
use crate::month::{Month, format_timestamp};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS api_usage_events (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    provider           TEXT    NOT NULL,
    endpoint           TEXT    NOT NULL,
    method             TEXT    NOT NULL,
    status_code        INTEGER,
    success            INTEGER NOT NULL DEFAULT 0,
    blocked            INTEGER NOT NULL DEFAULT 0,
    duration_ms        REAL,
    estimated_cost_usd REAL    NOT NULL DEFAULT 0,
    error              TEXT,
    metadata_json      TEXT    NOT NULL DEFAULT '{}',
    created_at         TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_api_usage_provider_month
    ON api_usage_events (provider, created_at);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-provider totals for one month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub blocked_calls: u64,
    /// Sum over every row, blocked rows included.
    pub cost_usd: f64,
}

/// Append-only record of metered call attempts and budget denials.
///
/// Writes go through a single connection behind a mutex so that concurrent
/// tasks never interleave partial rows. Reads open their own read-only
/// connection and never wait on writers (WAL mode).
///
/// A disabled ledger accepts writes and drops them; its reads return zero.
#[derive(Debug)]
pub struct Ledger {
    store: Option<Arc<Store>>,
}

#[derive(Debug)]
struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "usage ledger opened");
        Ok(Self {
            store: Some(Arc::new(Store {
                path,
                writer: Mutex::new(conn),
            })),
        })
    }

    /// A ledger that persists nothing.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.store.as_ref().map(|s| s.path.as_path())
    }

    /// Append an event, logging and counting any failure instead of
    /// returning it. Ledger trouble never fails the caller's operation.
    pub async fn record(&self, event: UsageEvent) {
        let provider = event.provider.clone();
        if let Err(e) = self.try_record(event).await {
            metrics::counter!("meter_gate_ledger_write_failures_total").increment(1);
            warn!(provider = %provider, error = %e, "failed to record usage event");
        }
    }

    /// Append an event and return its row id (`None` when disabled).
    pub async fn try_record(&self, event: UsageEvent) -> Result<Option<i64>> {
        let Some(store) = self.store.clone() else {
            return Ok(None);
        };
        let metadata = serde_json::to_string(&event.metadata)?;

        let id = tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = store.writer.lock();
            conn.execute(
                "INSERT INTO api_usage_events (
                    provider, endpoint, method, status_code, success, blocked,
                    duration_ms, estimated_cost_usd, error, metadata_json, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    event.provider,
                    event.endpoint,
                    event.method,
                    event.status_code,
                    event.success,
                    event.blocked,
                    event.duration_ms,
                    event.estimated_cost_usd,
                    event.error,
                    metadata,
                    format_timestamp(event.created_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| LedgerError::Task(e.to_string()))??;

        debug!(id, "usage event recorded");
        Ok(Some(id))
    }

    /// Month-to-date spend for `provider`, excluding blocked rows.
    pub async fn monthly_cost(&self, provider: &str, month: Month) -> Result<f64> {
        let provider = provider.to_string();
        let (start, end) = month.bounds();
        self.read(0.0, move |conn| {
            let cost = conn.query_row(
                "SELECT COALESCE(SUM(estimated_cost_usd), 0.0)
                 FROM api_usage_events
                 WHERE provider = ?1 AND blocked = 0
                   AND created_at >= ?2 AND created_at < ?3",
                params![provider, start, end],
                |row| row.get::<_, f64>(0),
            )?;
            Ok(cost)
        })
        .await
    }

    /// Per-provider totals for every provider with rows in `month`.
    pub async fn monthly_summary(&self, month: Month) -> Result<BTreeMap<String, ProviderSummary>> {
        let (start, end) = month.bounds();
        self.read(BTreeMap::new(), move |conn| {
            let mut stmt = conn.prepare(
                "SELECT provider,
                        COUNT(*),
                        COALESCE(SUM(success), 0),
                        COALESCE(SUM(blocked), 0),
                        COALESCE(SUM(estimated_cost_usd), 0.0)
                 FROM api_usage_events
                 WHERE created_at >= ?1 AND created_at < ?2
                 GROUP BY provider
                 ORDER BY provider",
            )?;
            let rows = stmt.query_map(params![start, end], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ProviderSummary {
                        total_calls: row.get::<_, i64>(1)?.max(0) as u64,
                        successful_calls: row.get::<_, i64>(2)?.max(0) as u64,
                        blocked_calls: row.get::<_, i64>(3)?.max(0) as u64,
                        cost_usd: row.get::<_, f64>(4)?,
                    },
                ))
            })?;

            let mut summary = BTreeMap::new();
            for row in rows {
                let (provider, totals) = row?;
                summary.insert(provider, totals);
            }
            Ok(summary)
        })
        .await
    }

    /// All events for `provider` in `month`, oldest first.
    pub async fn events(&self, provider: &str, month: Month) -> Result<Vec<StoredEvent>> {
        let provider = provider.to_string();
        let (start, end) = month.bounds();
        self.read(Vec::new(), move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, provider, endpoint, method, status_code, success, blocked,
                        duration_ms, estimated_cost_usd, error, metadata_json, created_at
                 FROM api_usage_events
                 WHERE provider = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![provider, start, end], row_to_event)?;
            let events = rows.collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .await
    }

    /// Run `query` on a fresh read-only connection, or return `empty` when
    /// the ledger is disabled.
    async fn read<T, F>(&self, empty: T, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let Some(store) = self.store.clone() else {
            return Ok(empty);
        };
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &store.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            query(&conn)
        })
        .await
        .map_err(|e| LedgerError::Task(e.to_string()))?
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    let metadata_json: String = row.get(10)?;
    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(11)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(StoredEvent {
        id: row.get(0)?,
        event: UsageEvent {
            provider: row.get(1)?,
            endpoint: row.get(2)?,
            method: row.get(3)?,
            status_code: row.get(4)?,
            success: row.get(5)?,
            blocked: row.get(6)?,
            duration_ms: row.get(7)?,
            estimated_cost_usd: row.get(8)?,
            error: row.get(9)?,
            metadata,
            created_at,
        },
    })
}
