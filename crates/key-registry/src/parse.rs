//! Key list parsing and deduplication

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::credential::Credential;

/// Pairing separators, tried in order.
const SEPARATORS: [char; 2] = [':', '='];

/// Split a multi-key string on `,`, `;` or newlines, dropping blank tokens.
pub fn split_tokens(raw: &str) -> Vec<&str> {
    raw.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse one token into a credential.
///
/// `alias:secret` and `alias=secret` are split at the first separator; an
/// empty alias falls back to `default_alias`. A token without a separator
/// is a bare secret. Returns `None` when a pairing has an empty secret.
pub fn parse_token(token: &str, default_alias: &str) -> Option<Credential> {
    let token = token.trim();
    for separator in SEPARATORS {
        if let Some((left, right)) = token.split_once(separator) {
            let key = right.trim();
            if key.is_empty() {
                continue;
            }
            let alias = match left.trim() {
                "" => default_alias,
                alias => alias,
            };
            return Some(Credential::new(alias, key));
        }
    }

    if token.contains(SEPARATORS) {
        return None;
    }
    if token.is_empty() {
        return None;
    }
    Some(Credential::new(default_alias, token))
}

/// Build the ordered, deduplicated credential list.
///
/// Tokens from `multi` are aliased `key1..keyN` by position; a non-empty
/// `single` is appended as `key{N+1}`. Duplicate secrets keep the first
/// occurrence's alias. An empty result is not an error here: callers must
/// treat it as a fatal configuration problem.
pub fn load_credentials(multi: Option<&str>, single: Option<&str>) -> Vec<Credential> {
    let mut parsed: Vec<Credential> = Vec::new();

    if let Some(raw) = multi {
        for (index, token) in split_tokens(raw).into_iter().enumerate() {
            let default_alias = format!("key{}", index + 1);
            match parse_token(token, &default_alias) {
                Some(credential) => parsed.push(credential),
                None => warn!(
                    alias = %default_alias,
                    "skipping credential token with empty key"
                ),
            }
        }
    }

    if let Some(raw) = single {
        let key = raw.trim();
        if !key.is_empty() {
            parsed.push(Credential::new(format!("key{}", parsed.len() + 1), key));
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut credentials = Vec::with_capacity(parsed.len());
    for credential in parsed {
        if !seen.insert(credential.key().to_string()) {
            debug!(alias = %credential.alias, "dropping duplicate credential");
            continue;
        }
        credentials.push(credential);
    }
    credentials
}
