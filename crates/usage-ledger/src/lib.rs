//! Usage ledger and budget decisions for metered API calls
//!
//! The ledger is an append-only SQLite table with one row per call attempt
//! or per budget denial. Monthly spend is never kept in a counter: it is
//! recomputed from the rows every time it is needed, so a crash can lose at
//! most the event being written and never corrupts a running total.
//!
//! The budget engine reads the ledger before a metered side effect happens:
//! 1. Caller asks `BudgetEngine::enforce_or_raise(provider, endpoint, cost)`
//! 2. Engine resolves the per-call cost and sums this month's spend
//! 3. Allowed → caller performs the call and records the attempt
//! 4. Denied → engine records a `blocked` row and returns `BudgetError::Exceeded`

pub mod budget;
pub mod error;
pub mod event;
pub mod month;
pub mod store;

pub use budget::{BudgetDecision, BudgetEngine, BudgetError, BudgetPolicy};
pub use error::{LedgerError, Result};
pub use event::{StoredEvent, UsageEvent};
pub use month::Month;
pub use store::{Ledger, ProviderSummary};
