//! Budget-aware credential pool for metered API keys
//!
//! Holds the ordered credential list, a shared round-robin cursor, and a
//! TTL cache of per-key usage snapshots. Selection skips keys whose
//! month-to-date spend has reached the budget ceiling.
//!
//! Selection lifecycle:
//! 1. Caller asks `Pool::select(excluded, force_refresh)`
//! 2. Pool scans at most N keys starting at the cursor, under one lock
//! 3. Unknown usage → key selected optimistically
//! 4. Known usage under budget → key selected with its spend attached
//! 5. Nothing selectable → `Error::Exhausted` listing every exhausted key
//! 6. Optional background task keeps snapshots warm

pub mod cache;
pub mod error;
pub mod pool;
pub mod refresh;

pub use cache::SnapshotCache;
pub use error::{Error, Result};
pub use pool::{CredentialUsage, Pool};
pub use refresh::spawn_refresh_task;

#[cfg(test)]
pub(crate) mod testing;
