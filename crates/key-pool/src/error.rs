//! Error types for pool operations

/// Errors from credential selection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credentials were configured. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every candidate is excluded or at/over the monthly budget.
    #[error("{0}")]
    Exhausted(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
