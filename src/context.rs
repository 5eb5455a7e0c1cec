//! Cancellation context bound to a request.
//!
//! A [`Context`] combines an optional [`CancellationToken`] with an optional
//! deadline. The client checks it after every physical exchange and races it
//! against both the exchange and the backoff wait, so a single cancel (or an
//! expired deadline) stops the whole call.

use crate::Error;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope of one call. The default context never expires.
///
/// # Examples
///
/// ```
/// use courier::{CancellationToken, Context};
/// use std::time::Duration;
///
/// # #[tokio::main] async fn main() {
/// let token = CancellationToken::new();
/// let ctx = Context::background()
///     .with_cancel(token.clone())
///     .with_timeout(Duration::from_secs(5));
///
/// assert!(ctx.err().is_none());
/// token.cancel();
/// assert!(ctx.err().is_some());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// Returns an unbounded context.
    pub fn background() -> Self {
        Self::default()
    }

    /// Ties the context to `token`; cancelling the token cancels the call.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Sets a deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the cancellation error if the context is already done.
    ///
    /// An explicit cancel wins over an expired deadline.
    pub fn err(&self) -> Option<Error> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is done, yielding the cancellation error.
    ///
    /// Never resolves for an unbounded context.
    pub async fn done(&self) -> Error {
        match (&self.token, self.deadline) {
            (None, None) => std::future::pending().await,
            (Some(token), None) => {
                token.cancelled().await;
                Error::Canceled
            }
            (None, Some(deadline)) => {
                tokio::time::sleep_until(deadline).await;
                Error::DeadlineExceeded
            }
            (Some(token), Some(deadline)) => {
                tokio::select! {
                    _ = token.cancelled() => Error::Canceled,
                    _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());

        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_resolves_done() {
        let token = CancellationToken::new();
        let ctx = Context::background().with_cancel(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = ctx.done().await;
        assert!(matches!(err, Error::Canceled));
        assert!(matches!(ctx.err(), Some(Error::Canceled)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let err = ctx.done().await;
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::background()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_cancel_takes_precedence_over_deadline() {
        let token = CancellationToken::new();
        let ctx = Context::background()
            .with_cancel(token.clone())
            .with_deadline(Instant::now());
        token.cancel();
        assert!(matches!(ctx.err(), Some(Error::Canceled)));
    }
}
