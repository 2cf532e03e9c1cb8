//! Response classification for metered provider calls
//!
//! 401/403 mean the key itself is bad and it must be rotated out for the rest
//! of the call. 429 means the key is throttled; try another key or back off.
//! Everything else that is not 2xx is retried with exponential backoff.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

/// What a caller should do with a provider response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// Invalid or revoked key (401/403)
    AuthRejected,
    /// Throttled (429)
    RateLimited,
    /// Any other non-2xx status
    Failure,
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        401 | 403 => ResponseClass::AuthRejected,
        429 => ResponseClass::RateLimited,
        _ => ResponseClass::Failure,
    }
}

/// Parse `Retry-After` as whole seconds. HTTP-date values and garbage are
/// ignored so the caller falls back to its base delay.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn classify_status_success_range() {
        assert_eq!(classify_status(200), ResponseClass::Success);
        assert_eq!(classify_status(204), ResponseClass::Success);
        assert_eq!(classify_status(299), ResponseClass::Success);
    }

    #[test]
    fn classify_status_auth_rejected() {
        assert_eq!(classify_status(401), ResponseClass::AuthRejected);
        assert_eq!(classify_status(403), ResponseClass::AuthRejected);
    }

    #[test]
    fn classify_status_rate_limited() {
        assert_eq!(classify_status(429), ResponseClass::RateLimited);
    }

    #[test]
    fn classify_status_everything_else_fails() {
        for status in [301, 400, 404, 408, 500, 502, 503, 504] {
            assert_eq!(classify_status(status), ResponseClass::Failure, "{status}");
        }
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 7 "));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
    }

    #[test]
    fn retry_after_missing_or_invalid() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
