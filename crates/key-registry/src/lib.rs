//! Credential registry for metered API keys
//!
//! Turns raw configuration (a delimited multi-key string and/or a single key)
//! into a deterministic, deduplicated, ordered list of named credentials.
//! Parsing is pure: no I/O, no environment access. Callers decide where the
//! raw strings come from.
//!
//! Accepted token forms:
//! - `alias:secret`
//! - `alias=secret`
//! - bare `secret` (alias auto-assigned as `key1`, `key2`, ...)

pub mod credential;
pub mod parse;

pub use credential::Credential;
pub use parse::{load_credentials, parse_token, split_tokens};
