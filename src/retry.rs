//! Retry policies, triggers and backoff functions.
//!
//! A [`RetryPolicy`] separates three concerns:
//!
//! - **whether** a completed attempt should be retried ([`Trigger`]),
//! - **how long** to wait before the next attempt ([`Backoff`]),
//! - **how many** attempts are allowed at most (`max_attempts`).
//!
//! Every field is optional. A per-request policy is merged field by field over
//! the client default, which in turn is merged over the built-in defaults:
//! one attempt, 100ms base wait, 2s maximum wait, [`RetryOnRetryable`] and
//! jittered [`ExponentialBackoff`].

use crate::rate_limit::RateLimitInfo;
use crate::Response;
use http::StatusCode;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: usize = 1;
const DEFAULT_WAIT_TIME: Duration = Duration::from_millis(100);
const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_secs(2);

/// Decides whether a completed attempt should be retried.
///
/// Any `Fn(&Response) -> bool` is a trigger.
///
/// # Examples
///
/// ```
/// use courier::{Response, Trigger};
///
/// struct RetryOnRateLimit;
///
/// impl Trigger for RetryOnRateLimit {
///     fn should_retry(&self, response: &Response) -> bool {
///         response.status().is_some_and(|s| s.as_u16() == 429)
///     }
/// }
/// ```
pub trait Trigger: Send + Sync {
    /// Returns `true` if the attempt that produced `response` should be retried.
    fn should_retry(&self, response: &Response) -> bool;
}

impl<F> Trigger for F
where
    F: Fn(&Response) -> bool + Send + Sync,
{
    fn should_retry(&self, response: &Response) -> bool {
        self(response)
    }
}

/// Computes how long to wait before the next attempt.
///
/// `attempt` is the zero-based index of the attempt that just completed.
/// Any `Fn(Duration, Duration, usize, &Response) -> Duration` is a backoff.
pub trait Backoff: Send + Sync {
    /// Returns the delay before the attempt following `attempt`.
    fn delay(
        &self,
        wait_time: Duration,
        max_wait_time: Duration,
        attempt: usize,
        response: &Response,
    ) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(Duration, Duration, usize, &Response) -> Duration + Send + Sync,
{
    fn delay(
        &self,
        wait_time: Duration,
        max_wait_time: Duration,
        attempt: usize,
        response: &Response,
    ) -> Duration {
        self(wait_time, max_wait_time, attempt, response)
    }
}

/// Retry configuration. Unset fields inherit from the policy it is merged over.
///
/// # Examples
///
/// ```
/// use courier::retry::{ConstantBackoff, RetryOn5xx, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .max_attempts(3)
///     .wait_time(Duration::from_millis(10))
///     .trigger(RetryOn5xx)
///     .backoff(ConstantBackoff);
/// assert_eq!(policy.get_max_attempts(), Some(3));
/// ```
#[derive(Clone, Default)]
pub struct RetryPolicy {
    max_attempts: Option<usize>,
    wait_time: Option<Duration>,
    max_wait_time: Option<Duration>,
    trigger: Option<Arc<dyn Trigger>>,
    backoff: Option<Arc<dyn Backoff>>,
}

impl RetryPolicy {
    /// Creates a policy with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of attempts, the first one included. Zero is treated as one.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Sets the base wait handed to the backoff.
    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    /// Sets the maximum wait handed to the backoff.
    pub fn max_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = Some(max_wait_time);
        self
    }

    /// Sets the retry trigger.
    pub fn trigger(mut self, trigger: impl Trigger + 'static) -> Self {
        self.trigger = Some(Arc::new(trigger));
        self
    }

    /// Sets the backoff function.
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// Returns the configured maximum number of attempts.
    pub fn get_max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }

    /// Fills every unset field of `self` from `fallback`.
    pub fn merge(self, fallback: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.or(fallback.max_attempts),
            wait_time: self.wait_time.or(fallback.wait_time),
            max_wait_time: self.max_wait_time.or(fallback.max_wait_time),
            trigger: self.trigger.or_else(|| fallback.trigger.clone()),
            backoff: self.backoff.or_else(|| fallback.backoff.clone()),
        }
    }

    pub(crate) fn resolve(&self) -> ResolvedRetry {
        ResolvedRetry {
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            wait_time: self.wait_time.unwrap_or(DEFAULT_WAIT_TIME),
            max_wait_time: self.max_wait_time.unwrap_or(DEFAULT_MAX_WAIT_TIME),
            trigger: self
                .trigger
                .clone()
                .unwrap_or_else(|| Arc::new(RetryOnRetryable)),
            backoff: self
                .backoff
                .clone()
                .unwrap_or_else(|| Arc::new(ExponentialBackoff { jitter: true })),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("wait_time", &self.wait_time)
            .field("max_wait_time", &self.max_wait_time)
            .field("trigger", &self.trigger.as_ref().map(|_| ".."))
            .field("backoff", &self.backoff.as_ref().map(|_| ".."))
            .finish()
    }
}

/// A policy with every field filled in.
pub(crate) struct ResolvedRetry {
    pub(crate) max_attempts: usize,
    pub(crate) wait_time: Duration,
    pub(crate) max_wait_time: Duration,
    pub(crate) trigger: Arc<dyn Trigger>,
    pub(crate) backoff: Arc<dyn Backoff>,
}

impl ResolvedRetry {
    pub(crate) fn delay(&self, attempt: usize, response: &Response) -> Duration {
        self.backoff
            .delay(self.wait_time, self.max_wait_time, attempt, response)
    }
}

/// Retry failed exchanges whose error is retryable, and 429 or 5xx responses.
///
/// This is the default trigger.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl Trigger for RetryOnRetryable {
    fn should_retry(&self, response: &Response) -> bool {
        match response.error() {
            Some(error) => error.is_retryable(),
            None => response
                .status()
                .is_some_and(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS),
        }
    }
}

/// Retry only on 5xx server errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl Trigger for RetryOn5xx {
    fn should_retry(&self, response: &Response) -> bool {
        response.error().is_none() && response.status().is_some_and(|s| s.is_server_error())
    }
}

/// Retry only on timeout errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl Trigger for RetryOnTimeout {
    fn should_retry(&self, response: &Response) -> bool {
        matches!(response.error(), Some(crate::Error::Timeout))
    }
}

/// Retry only on network/connection errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl Trigger for RetryOnConnectionError {
    fn should_retry(&self, response: &Response) -> bool {
        matches!(
            response.error(),
            Some(crate::Error::Network(_) | crate::Error::Transport(_))
        )
    }
}

/// Retry when the response status is one of the listed codes.
#[derive(Debug, Clone)]
pub struct RetryOnStatus(pub Vec<StatusCode>);

impl Trigger for RetryOnStatus {
    fn should_retry(&self, response: &Response) -> bool {
        response.error().is_none()
            && response
                .status()
                .is_some_and(|status| self.0.contains(&status))
    }
}

/// Combine multiple triggers with OR logic.
///
/// Retries if ANY of the triggers return `true`.
///
/// # Examples
///
/// ```
/// use courier::retry::{OrTrigger, RetryOn5xx, RetryOnTimeout};
///
/// // Retry on 5xx errors OR timeouts
/// let trigger = OrTrigger::new(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);
/// ```
pub struct OrTrigger {
    triggers: Vec<Box<dyn Trigger>>,
}

impl OrTrigger {
    /// Creates a new `OrTrigger` from a list of triggers.
    pub fn new(triggers: Vec<Box<dyn Trigger>>) -> Self {
        Self { triggers }
    }
}

impl Trigger for OrTrigger {
    fn should_retry(&self, response: &Response) -> bool {
        self.triggers.iter().any(|t| t.should_retry(response))
    }
}

/// Combine multiple triggers with AND logic.
///
/// Retries only if ALL of the triggers return `true`.
pub struct AndTrigger {
    triggers: Vec<Box<dyn Trigger>>,
}

impl AndTrigger {
    /// Creates a new `AndTrigger` from a list of triggers.
    pub fn new(triggers: Vec<Box<dyn Trigger>>) -> Self {
        Self { triggers }
    }
}

impl Trigger for AndTrigger {
    fn should_retry(&self, response: &Response) -> bool {
        self.triggers.iter().all(|t| t.should_retry(response))
    }
}

/// Waits `wait_time * 2^attempt`, capped at `max_wait_time`.
///
/// With `jitter`, the delay is scaled by a random factor between 50% and 100%
/// to keep many clients from retrying in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Backoff for ExponentialBackoff {
    fn delay(
        &self,
        wait_time: Duration,
        max_wait_time: Duration,
        attempt: usize,
        _response: &Response,
    ) -> Duration {
        let multiplier = 2u32.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
        let delay = wait_time.saturating_mul(multiplier).min(max_wait_time);

        if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(jitter_factor)
        } else {
            delay
        }
    }
}

/// Always waits `wait_time`.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff;

impl Backoff for ConstantBackoff {
    fn delay(&self, wait_time: Duration, _: Duration, _: usize, _: &Response) -> Duration {
        wait_time
    }
}

/// Waits `wait_time * (attempt + 1)`, capped at `max_wait_time`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff;

impl Backoff for LinearBackoff {
    fn delay(
        &self,
        wait_time: Duration,
        max_wait_time: Duration,
        attempt: usize,
        _response: &Response,
    ) -> Duration {
        let steps = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
        wait_time.saturating_mul(steps).min(max_wait_time)
    }
}

/// Honours `Retry-After` and rate limit reset headers, capped at
/// `max_wait_time`, and falls back to another backoff otherwise.
///
/// # Examples
///
/// ```
/// use courier::retry::{ExponentialBackoff, RetryAfterBackoff, RetryPolicy};
///
/// let policy = RetryPolicy::new()
///     .max_attempts(5)
///     .backoff(RetryAfterBackoff::new(ExponentialBackoff { jitter: true }));
/// ```
#[derive(Debug, Clone)]
pub struct RetryAfterBackoff<B> {
    fallback: B,
}

impl<B: Backoff> RetryAfterBackoff<B> {
    /// Creates a backoff that falls back to `fallback` when no hint is present.
    pub fn new(fallback: B) -> Self {
        Self { fallback }
    }
}

impl<B: Backoff> Backoff for RetryAfterBackoff<B> {
    fn delay(
        &self,
        wait_time: Duration,
        max_wait_time: Duration,
        attempt: usize,
        response: &Response,
    ) -> Duration {
        let hinted = response
            .headers()
            .map(RateLimitInfo::from_headers)
            .filter(RateLimitInfo::is_rate_limited)
            .and_then(|info| info.delay(max_wait_time));

        match hinted {
            Some(delay) => {
                tracing::info!(
                    rate_limit_delay_ms = delay.as_millis() as u64,
                    attempt = attempt,
                    "Rate limited - waiting before retry"
                );
                delay
            }
            None => self
                .fallback
                .delay(wait_time, max_wait_time, attempt, response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RawResponse;
    use crate::Error;
    use url::Url;

    fn response_with(status: u16, headers: &[(&'static str, &'static str)]) -> Response {
        let mut raw = RawResponse::new(
            StatusCode::from_u16(status).unwrap(),
            Url::parse("http://localhost/").unwrap(),
        );
        for (name, value) in headers {
            raw.headers.insert(*name, value.parse().unwrap());
        }
        Response::from_raw(raw)
    }

    fn delays(backoff: &dyn Backoff, attempts: usize) -> Vec<Duration> {
        let response = response_with(500, &[]);
        (0..attempts)
            .map(|attempt| {
                backoff.delay(
                    Duration::from_millis(100),
                    Duration::from_millis(1000),
                    attempt,
                    &response,
                )
            })
            .collect()
    }

    #[test]
    fn test_exponential_backoff_delays() {
        assert_eq!(
            delays(&ExponentialBackoff { jitter: false }, 6),
            [100, 200, 400, 800, 1000, 1000].map(Duration::from_millis)
        );
    }

    #[test]
    fn test_exponential_backoff_jitter_bounds() {
        for delay in delays(&ExponentialBackoff { jitter: true }, 3)
            .into_iter()
            .zip([100, 200, 400])
        {
            let (actual, base) = delay;
            assert!(actual >= Duration::from_millis(base / 2));
            assert!(actual <= Duration::from_millis(base));
        }
    }

    #[test]
    fn test_exponential_backoff_huge_attempt_saturates() {
        let response = response_with(500, &[]);
        let delay = ExponentialBackoff { jitter: false }.delay(
            Duration::from_millis(100),
            Duration::from_secs(30),
            usize::MAX,
            &response,
        );
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn test_linear_and_constant_delays() {
        assert_eq!(
            delays(&LinearBackoff, 4),
            [100, 200, 300, 400].map(Duration::from_millis)
        );
        assert_eq!(
            delays(&ConstantBackoff, 3),
            [100, 100, 100].map(Duration::from_millis)
        );
    }

    #[test]
    fn test_retry_after_backoff_prefers_header() {
        let backoff = RetryAfterBackoff::new(ConstantBackoff);
        let limited = response_with(429, &[("retry-after", "1")]);
        assert_eq!(
            backoff.delay(
                Duration::from_millis(100),
                Duration::from_secs(5),
                0,
                &limited
            ),
            Duration::from_secs(1)
        );

        let capped = response_with(429, &[("retry-after", "120")]);
        assert_eq!(
            backoff.delay(
                Duration::from_millis(100),
                Duration::from_secs(5),
                0,
                &capped
            ),
            Duration::from_secs(5)
        );

        let plain = response_with(503, &[]);
        assert_eq!(
            backoff.delay(Duration::from_millis(100), Duration::from_secs(5), 0, &plain),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_default_trigger() {
        assert!(RetryOnRetryable.should_retry(&response_with(503, &[])));
        assert!(RetryOnRetryable.should_retry(&response_with(429, &[])));
        assert!(!RetryOnRetryable.should_retry(&response_with(404, &[])));
        assert!(RetryOnRetryable.should_retry(&Response::from_error(Error::Timeout)));
        assert!(!RetryOnRetryable.should_retry(&Response::from_error(Error::Canceled)));
    }

    #[test]
    fn test_combined_triggers() {
        let either = OrTrigger::new(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);
        assert!(either.should_retry(&response_with(502, &[])));
        assert!(either.should_retry(&Response::from_error(Error::Timeout)));
        assert!(!either.should_retry(&response_with(400, &[])));

        let both = AndTrigger::new(vec![
            Box::new(RetryOn5xx),
            Box::new(RetryOnStatus(vec![StatusCode::BAD_GATEWAY])),
        ]);
        assert!(both.should_retry(&response_with(502, &[])));
        assert!(!both.should_retry(&response_with(500, &[])));
    }

    #[test]
    fn test_closure_trigger() {
        let policy = RetryPolicy::new().trigger(|response: &Response| {
            response.status() == Some(StatusCode::IM_A_TEAPOT)
        });
        let resolved = policy.resolve();
        assert!(resolved.trigger.should_retry(&response_with(418, &[])));
        assert!(!resolved.trigger.should_retry(&response_with(500, &[])));
    }

    #[test]
    fn test_merge_is_field_by_field() {
        let client_default = RetryPolicy::new()
            .max_attempts(4)
            .wait_time(Duration::from_millis(50))
            .backoff(ConstantBackoff);
        let per_request = RetryPolicy::new()
            .max_attempts(2)
            .max_wait_time(Duration::from_secs(9));

        let resolved = per_request.merge(&client_default).resolve();
        assert_eq!(resolved.max_attempts, 2);
        assert_eq!(resolved.wait_time, Duration::from_millis(50));
        assert_eq!(resolved.max_wait_time, Duration::from_secs(9));
        assert_eq!(
            resolved.delay(3, &response_with(500, &[])),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_defaults() {
        let resolved = RetryPolicy::new().resolve();
        assert_eq!(resolved.max_attempts, 1);
        assert_eq!(resolved.wait_time, Duration::from_millis(100));
        assert_eq!(resolved.max_wait_time, Duration::from_secs(2));
        assert_eq!(RetryPolicy::new().max_attempts(0).get_max_attempts(), Some(1));
    }
}
