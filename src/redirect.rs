//! Redirect policies and per-hop request rewriting.
//!
//! Redirects are followed by the [`Client`](crate::Client), never by the
//! transport, so the cookie jar and the policy see every hop regardless of
//! which [`Transport`](crate::Transport) is installed.
//!
//! ## Default Behavior
//!
//! - At most 10 requests per call; the tenth redirect fails with [`TooManyRedirects`]
//! - 301/302 turn `POST` into `GET`, 303 turns everything but `GET`/`HEAD` into `GET`,
//!   and all three drop the body
//! - 307/308 keep method and body, provided the body can be replayed
//! - `Authorization`, `Cookie` and `Proxy-Authorization` are stripped on cross-origin hops

use crate::BoxError;
use http::{header, HeaderMap, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use url::Url;

const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Headers describing a body that is no longer sent after a method rewrite.
const CONTENT_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
];

/// A redirect the client is about to follow.
#[derive(Debug)]
pub struct RedirectAttempt<'a> {
    status: StatusCode,
    next: &'a Url,
    previous: &'a [Url],
}

impl<'a> RedirectAttempt<'a> {
    pub(crate) fn new(status: StatusCode, next: &'a Url, previous: &'a [Url]) -> Self {
        Self {
            status,
            next,
            previous,
        }
    }

    /// The redirect status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The resolved `Location` target.
    pub fn url(&self) -> &Url {
        self.next
    }

    /// URLs already requested during this call, oldest first.
    pub fn previous(&self) -> &[Url] {
        self.previous
    }
}

/// What to do with a redirect response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectAction {
    /// Request the `Location` target.
    Follow,
    /// Return the redirect response to the caller unchanged.
    Stop,
}

type PolicyFn = dyn Fn(&RedirectAttempt<'_>) -> Result<RedirectAction, BoxError> + Send + Sync;

/// Decides whether a redirect is followed.
///
/// An error returned by the policy becomes [`Error::Redirect`](crate::Error::Redirect).
///
/// # Examples
///
/// ```
/// use courier::redirect::{RedirectAction, RedirectPolicy};
///
/// // Only follow redirects that stay on the same host.
/// let policy = RedirectPolicy::custom(|attempt| {
///     let origin = attempt.previous().first().and_then(|u| u.host_str());
///     if origin == attempt.url().host_str() {
///         Ok(RedirectAction::Follow)
///     } else {
///         Ok(RedirectAction::Stop)
///     }
/// });
/// ```
#[derive(Clone)]
pub struct RedirectPolicy {
    inner: Arc<PolicyFn>,
}

impl RedirectPolicy {
    /// Follows redirects until `max` requests have been made, then fails.
    pub fn limited(max: usize) -> Self {
        Self::custom(move |attempt| {
            if attempt.previous().len() >= max {
                Err(Box::new(TooManyRedirects(max)) as BoxError)
            } else {
                Ok(RedirectAction::Follow)
            }
        })
    }

    /// Never follows redirects.
    pub fn none() -> Self {
        Self::custom(|_| Ok(RedirectAction::Stop))
    }

    /// A policy backed by a custom function.
    pub fn custom<F>(policy: F) -> Self
    where
        F: Fn(&RedirectAttempt<'_>) -> Result<RedirectAction, BoxError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(policy),
        }
    }

    pub(crate) fn check(&self, attempt: &RedirectAttempt<'_>) -> Result<RedirectAction, BoxError> {
        (self.inner)(attempt)
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::limited(DEFAULT_MAX_REDIRECTS)
    }
}

impl fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectPolicy").finish_non_exhaustive()
    }
}

/// The redirect limit was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stopped after {0} redirects")]
pub struct TooManyRedirects(pub usize);

/// How the next hop is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hop {
    pub(crate) method: Method,
    pub(crate) keep_body: bool,
}

/// Returns how to follow `status` for a request sent with `method`, or
/// `None` if the status is not a followable redirect.
pub(crate) fn next_hop(status: StatusCode, method: &Method) -> Option<Hop> {
    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => Some(Hop {
            method: if *method == Method::POST {
                Method::GET
            } else {
                method.clone()
            },
            keep_body: false,
        }),
        StatusCode::SEE_OTHER => Some(Hop {
            method: if *method == Method::GET || *method == Method::HEAD {
                method.clone()
            } else {
                Method::GET
            },
            keep_body: false,
        }),
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => Some(Hop {
            method: method.clone(),
            keep_body: true,
        }),
        _ => None,
    }
}

/// Resolves a `Location` header against the URL that produced it.
pub(crate) fn location(headers: &HeaderMap, base: &Url) -> Option<Result<Url, BoxError>> {
    let value = headers.get(header::LOCATION)?;
    Some(
        value
            .to_str()
            .map_err(BoxError::from)
            .and_then(|location| base.join(location).map_err(BoxError::from)),
    )
}

/// Rewrites `headers` for the next hop.
pub(crate) fn prepare_headers(headers: &mut HeaderMap, from: &Url, to: &Url, keep_body: bool) {
    if !keep_body {
        for name in CONTENT_HEADERS {
            headers.remove(name);
        }
    }

    if from.origin() != to.origin() {
        for name in SENSITIVE_HEADERS {
            if headers.remove(name).is_some() {
                tracing::debug!(header = %name, "Stripped sensitive header on cross-origin redirect");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_method_rewrites() {
        let post = Method::POST;
        let put = Method::PUT;

        assert_eq!(
            next_hop(StatusCode::FOUND, &post),
            Some(Hop {
                method: Method::GET,
                keep_body: false
            })
        );
        assert_eq!(next_hop(StatusCode::MOVED_PERMANENTLY, &put).unwrap().method, Method::PUT);
        assert_eq!(next_hop(StatusCode::SEE_OTHER, &put).unwrap().method, Method::GET);
        assert_eq!(
            next_hop(StatusCode::SEE_OTHER, &Method::HEAD).unwrap().method,
            Method::HEAD
        );
        assert_eq!(
            next_hop(StatusCode::TEMPORARY_REDIRECT, &post),
            Some(Hop {
                method: Method::POST,
                keep_body: true
            })
        );
        assert_eq!(next_hop(StatusCode::NOT_MODIFIED, &Method::GET), None);
    }

    #[test]
    fn test_location_is_resolved_relative_to_base() {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static("../next?x=1"));

        let resolved = location(&headers, &url("http://example.com/a/b/c"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.as_str(), "http://example.com/a/next?x=1");

        assert!(location(&HeaderMap::new(), &url("http://example.com/")).is_none());
    }

    #[test]
    fn test_cross_origin_strips_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert(header::COOKIE, HeaderValue::from_static("a=b"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let mut same = headers.clone();
        prepare_headers(
            &mut same,
            &url("https://example.com/foo"),
            &url("https://example.com:443/bar"),
            true,
        );
        assert!(same.contains_key(header::AUTHORIZATION));

        prepare_headers(
            &mut headers,
            &url("https://example.com/foo"),
            &url("https://other.com/bar"),
            true,
        );
        assert!(!headers.contains_key(header::AUTHORIZATION));
        assert!(!headers.contains_key(header::COOKIE));
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_dropped_body_removes_content_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let here = url("http://example.com/");
        prepare_headers(&mut headers, &here, &here, false);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_limited_policy() {
        let policy = RedirectPolicy::limited(2);
        let next = url("http://example.com/next");
        let one = [url("http://example.com/")];
        let two = [url("http://example.com/"), url("http://example.com/a")];

        let attempt = RedirectAttempt::new(StatusCode::FOUND, &next, &one);
        assert_eq!(policy.check(&attempt).unwrap(), RedirectAction::Follow);

        let attempt = RedirectAttempt::new(StatusCode::FOUND, &next, &two);
        let err = policy.check(&attempt).unwrap_err();
        assert_eq!(err.to_string(), "stopped after 2 redirects");

        let attempt = RedirectAttempt::new(StatusCode::FOUND, &next, &one);
        assert_eq!(
            RedirectPolicy::none().check(&attempt).unwrap(),
            RedirectAction::Stop
        );
    }
}
