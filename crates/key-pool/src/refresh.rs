//! Background usage snapshot refresh
//!
//! Spawns a periodic task that re-queries usage for every credential so that
//! selection on the request path usually hits a warm cache. The task never
//! touches the selection cursor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::pool::Pool;

/// Spawn a background task that force-refreshes every snapshot each `interval`.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_refresh_task(pool: Arc<Pool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&pool).await;
        }
    })
}

/// Run one refresh cycle over all credentials.
async fn refresh_cycle(pool: &Pool) {
    let mut refreshed = 0usize;
    for credential in pool.credentials() {
        if let Some(snapshot) = pool.cache().get_or_fetch(credential, true).await {
            debug!(
                alias = %credential.alias,
                cost_usd = snapshot.total_cost_usd,
                "usage snapshot refreshed"
            );
            refreshed += 1;
        }
    }
    info!(
        refreshed,
        total = pool.credentials().len(),
        "background usage refresh complete"
    );
}
