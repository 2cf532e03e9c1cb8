//! Error types for ledger operations

/// Errors from reading or writing the usage ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("ledger task failed: {0}")]
    Task(String),
}

/// Result alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
