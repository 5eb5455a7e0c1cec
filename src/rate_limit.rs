//! Rate limit hints carried in response headers.
//!
//! Used by [`RetryAfterBackoff`](crate::retry::RetryAfterBackoff) to wait as
//! long as the server asked before the next attempt.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Rate limit data parsed from a response's headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// When the rate limit window resets (`X-RateLimit-Reset` or `RateLimit-Reset`).
    pub reset_at: Option<SystemTime>,

    /// How long the server asked the client to wait (`Retry-After`).
    pub retry_after: Option<Duration>,

    /// Requests left in the current window (`X-RateLimit-Remaining` or `RateLimit-Remaining`).
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Extracts rate limit information from response headers.
    ///
    /// `Retry-After` accepts both delay-seconds and an HTTP date. Reset
    /// headers are Unix timestamps.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "60".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert!(info.is_rate_limited());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            reset_at: parse_reset(headers),
            retry_after: parse_retry_after(headers),
            remaining: first_number(headers, &["x-ratelimit-remaining", "ratelimit-remaining"]),
        }
    }

    /// Returns the wait the server asked for, capped at `max_wait`.
    ///
    /// `Retry-After` wins over the reset timestamp. Returns `None` when
    /// neither is present or the reset time has already passed.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }

        self.reset_at
            .and_then(|reset_at| reset_at.duration_since(SystemTime::now()).ok())
            .map(|until_reset| until_reset.min(max_wait))
    }

    /// Returns `true` when `Retry-After` is set or the window is exhausted.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.remaining == Some(0)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;

    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // A date in the past means "retry now".
    httpdate::parse_http_date(value)
        .ok()
        .map(|at| at.duration_since(SystemTime::now()).unwrap_or_default())
}

fn parse_reset(headers: &HeaderMap) -> Option<SystemTime> {
    first_number(headers, &["x-ratelimit-reset", "ratelimit-reset"])
        .map(|timestamp| UNIX_EPOCH + Duration::from_secs(timestamp))
}

fn first_number(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));

        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_retry_after_http_date() {
        let mut headers = HeaderMap::new();
        let at = SystemTime::now() + Duration::from_secs(30);
        headers.insert(
            "retry-after",
            HeaderValue::from_str(&httpdate::fmt_http_date(at)).unwrap(),
        );

        let delay = parse_retry_after(&headers).unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(28), "got {delay:?}");
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_reset_and_remaining() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from_str(&(unix_now() + 2).to_string()).unwrap(),
        );
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));

        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info.remaining, Some(0));
        assert!(info.is_rate_limited());

        // Whole-second timestamps can shave up to a second off the delay.
        let delay = info.delay(Duration::from_secs(300)).unwrap();
        assert!(
            delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
            "got {delay:?}"
        );
    }

    #[test]
    fn test_draft_standard_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "ratelimit-reset",
            HeaderValue::from_str(&(unix_now() + 120).to_string()).unwrap(),
        );
        headers.insert("ratelimit-remaining", HeaderValue::from_static("42"));

        let info = RateLimitInfo::from_headers(&headers);
        assert!(info.reset_at.is_some());
        assert_eq!(info.remaining, Some(42));
        assert!(!info.is_rate_limited());
    }

    #[test]
    fn test_delay_capped_by_max_wait() {
        let info = RateLimitInfo {
            reset_at: None,
            retry_after: Some(Duration::from_secs(600)),
            remaining: Some(0),
        };

        assert_eq!(
            info.delay(Duration::from_secs(300)),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_no_headers() {
        let info = RateLimitInfo::from_headers(&HeaderMap::new());
        assert_eq!(info, RateLimitInfo::default());
        assert_eq!(info.delay(Duration::from_secs(1)), None);
    }
}
