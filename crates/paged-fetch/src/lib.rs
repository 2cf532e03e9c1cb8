//! Paginated reads against a metered API with credential rotation
//!
//! `FetchClient::fetch_paginated` walks `links.next` pages using keys handed
//! out by the key pool. Rejected keys (401/403) are dropped for the rest of
//! the call; throttled keys (429) are rotated away from when another key is
//! available and otherwise backed off. Every attempt lands in the usage
//! ledger. The call never fails outright: it returns a `FetchReport` with
//! whatever items were collected and the reason it stopped early, if any.

pub mod artifact;
pub mod client;
pub mod error;
pub mod sleeper;

pub use artifact::{artifact_slug, write_atomic};
pub use client::{FetchClient, FetchReport, FetchSettings};
pub use error::FetchError;
pub use sleeper::{Sleeper, TokioSleeper};
