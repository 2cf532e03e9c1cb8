//! Common types shared by the meter-gate crates

mod secret;
mod error;

pub use secret::{Secret, mask};
pub use error::{Error, Result};
