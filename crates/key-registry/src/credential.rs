//! Credential value type

use common::Secret;

/// One named API key.
///
/// Credentials are immutable values. Selection hands out copies annotated
/// with the last known spend; the registry's own list is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub alias: String,
    pub secret: Secret<String>,
    /// Month-to-date spend reported by the provider when this copy was
    /// selected. `None` when usage could not be resolved.
    pub last_known_cost_usd: Option<f64>,
}

impl Credential {
    pub fn new(alias: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            secret: Secret::new(secret.into()),
            last_known_cost_usd: None,
        }
    }

    /// Raw key value for request headers and cache lookups.
    pub fn key(&self) -> &str {
        self.secret.expose()
    }

    /// Log-safe rendering of the key (`abcd...wxyz`).
    pub fn mask(&self) -> String {
        self.secret.masked()
    }

    /// Copy of this credential carrying the given spend annotation.
    pub fn with_cost(&self, cost_usd: Option<f64>) -> Self {
        Self {
            alias: self.alias.clone(),
            secret: self.secret.clone(),
            last_known_cost_usd: cost_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_never_contains_key() {
        let credential = Credential::new("primary", "sk-very-secret-value");
        let debug = format!("{credential:?}");
        assert!(debug.contains("primary"));
        assert!(!debug.contains("sk-very-secret-value"), "got: {debug}");
    }

    #[test]
    fn with_cost_returns_annotated_copy() {
        let original = Credential::new("primary", "abcdefgh1234");
        let annotated = original.with_cost(Some(2.5));

        assert_eq!(annotated.last_known_cost_usd, Some(2.5));
        assert_eq!(annotated.key(), "abcdefgh1234");
        assert_eq!(original.last_known_cost_usd, None);
    }

    #[test]
    fn mask_delegates_to_secret() {
        let credential = Credential::new("primary", "abcdefgh1234");
        assert_eq!(credential.mask(), "abcd...1234");
    }
}
