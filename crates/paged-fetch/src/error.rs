//! Error types for paginated fetches

/// Why a paginated fetch stopped before the last page.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("no credential available: {0}")]
    NoCredential(String),

    #[error("authentication failed and no replacement key is available: {0}")]
    Authentication(String),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("request failed after {attempts} attempts: {last_error}")]
    Transient { attempts: u32, last_error: String },

    #[error("invalid fetch configuration: {0}")]
    Config(String),
}

impl FetchError {
    /// Stable label for metrics and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoCredential(_) => "no_credential",
            Self::Authentication(_) => "authentication",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = FetchError::Transient {
            attempts: 5,
            last_error: "status 502".into(),
        };
        assert_eq!(err.to_string(), "request failed after 5 attempts: status 502");
        assert_eq!(
            FetchError::RateLimited { attempts: 3 }.to_string(),
            "rate limited after 3 attempts"
        );
    }

    #[test]
    fn kind_labels() {
        assert_eq!(FetchError::NoCredential("x".into()).kind(), "no_credential");
        assert_eq!(FetchError::Authentication("x".into()).kind(), "authentication");
        assert_eq!(FetchError::RateLimited { attempts: 1 }.kind(), "rate_limited");
    }
}
