//! Error types for HTTP calls.
//!
//! Every failure the client can produce is a variant of [`Error`]. Variants are
//! grouped into a small taxonomy exposed through [`Error::kind`], so callers can
//! branch on the category (configuration, transport, cancellation, ...) without
//! matching every variant.

use crate::hooks::HookPhase;
use http::StatusCode;
use std::fmt;
use std::io;
use std::sync::Arc;

/// A boxed error that can cross thread boundaries.
///
/// Hooks, redirect policies and custom transports report failures with this type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A reference-counted error source, so that [`Error`] can be cloned.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// The main error type for HTTP calls.
///
/// Errors are cheap to clone: a failed [`Response`](crate::Response) hands the
/// same error out from every accessor.
///
/// # Examples
///
/// ```no_run
/// use courier::{Client, Error, ErrorKind};
///
/// # async fn example() {
/// let client = Client::new();
/// let response = client.get("https://api.example.com/users/1").send().await;
///
/// match response.ensure_status_2xx().text().await {
///     Ok(body) => println!("{body}"),
///     Err(Error::UnexpectedStatus { status, .. }) => eprintln!("bad status {status}"),
///     Err(e) if e.kind() == ErrorKind::Cancellation => eprintln!("gave up: {e}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # }
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// A client setter rejected its input.
    ///
    /// `op` names the failing operation, e.g. `Client::set_proxy_url`.
    #[error("{op}: {source}")]
    Configuration {
        /// The operation that failed.
        op: &'static str,
        /// What went wrong.
        #[source]
        source: SharedError,
    },

    /// A TLS or proxy setter was called while a custom transport is installed.
    #[error("{op}: the installed transport is not configurable")]
    UnsupportedTransport {
        /// The operation that failed.
        op: &'static str,
    },

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Failed to encode the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// A network-level error reported by the built-in transport.
    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// A failure reported by a custom [`Transport`](crate::Transport).
    #[error("Transport error: {0}")]
    Transport(#[source] SharedError),

    /// The physical exchange took longer than the client timeout.
    #[error("Request timed out")]
    Timeout,

    /// Reading the response body failed.
    #[error("Failed to read response body: {0}")]
    Body(#[source] Arc<io::Error>),

    /// The redirect policy refused to follow a redirect, or the
    /// `Location` header could not be resolved.
    #[error("Redirect failed: {0}")]
    Redirect(#[source] SharedError),

    /// The request context was canceled.
    #[error("context canceled")]
    Canceled,

    /// The request context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The response declared gzip encoding but the payload is not valid gzip.
    #[error("Failed to decompress response: {0}")]
    Decompress(#[source] Arc<io::Error>),

    /// Failed to deserialize the response body.
    #[error("Failed to deserialize response (status {status}): {source}")]
    DeserializationFailed {
        /// The HTTP status code of the response.
        status: StatusCode,
        /// The serde error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// A status assertion on the response did not hold.
    #[error("bad status: {status} (expected {expected})")]
    UnexpectedStatus {
        /// The status the server returned.
        status: StatusCode,
        /// What the assertion required.
        expected: StatusExpectation,
    },

    /// The response carried no `Set-Cookie` headers.
    #[error("cookies not present")]
    NoCookies,

    /// The named cookie is absent.
    #[error("named cookie not present: {0}")]
    CookieNotFound(String),

    /// The client session is disabled, so there is no cookie jar to consult.
    #[error("cookie jar is disabled")]
    NoCookieJar,

    /// A hook returned an error and aborted its chain.
    #[error("{phase} hook #{index} failed: {source}")]
    HookAborted {
        /// Which chain the hook belongs to.
        phase: HookPhase,
        /// Zero-based position of the hook in its chain.
        index: usize,
        /// The hook's error.
        #[source]
        source: SharedError,
    },

    /// A local I/O operation failed (file output, diagnostics writer, draining a request stream).
    #[error("{op}: {source}")]
    Io {
        /// The operation that failed.
        op: &'static str,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// The category an [`Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input to a setter or to the request builder.
    Configuration,
    /// Network, DNS, TLS, redirect or body-read failure.
    Transport,
    /// Context canceled or deadline exceeded.
    Cancellation,
    /// Decompression or JSON decoding failure.
    Decode,
    /// A status assertion did not hold.
    StatusAssertion,
    /// Cookie jar disabled or cookie missing.
    CookieAbsent,
    /// A hook aborted its chain.
    Hook,
    /// Local filesystem or writer failure.
    Io,
}

/// The status a response was required to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusExpectation {
    /// Exactly this status.
    Exact(StatusCode),
    /// Any 2xx status.
    Success,
}

impl fmt::Display for StatusExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusExpectation::Exact(status) => write!(f, "{}", status.as_u16()),
            StatusExpectation::Success => f.write_str("2xx"),
        }
    }
}

impl Error {
    /// Returns the taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. }
            | Error::UnsupportedTransport { .. }
            | Error::InvalidUrl(_)
            | Error::SerializationFailed(_) => ErrorKind::Configuration,
            Error::Network(_)
            | Error::Transport(_)
            | Error::Timeout
            | Error::Body(_)
            | Error::Redirect(_) => ErrorKind::Transport,
            Error::Canceled | Error::DeadlineExceeded => ErrorKind::Cancellation,
            Error::Decompress(_) | Error::DeserializationFailed { .. } => ErrorKind::Decode,
            Error::UnexpectedStatus { .. } => ErrorKind::StatusAssertion,
            Error::NoCookies | Error::CookieNotFound(_) | Error::NoCookieJar => {
                ErrorKind::CookieAbsent
            }
            Error::HookAborted { .. } => ErrorKind::Hook,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Network errors, transport failures, timeouts and body-read failures are
    /// considered retryable. Everything else is a property of the request or of
    /// the caller and will not improve on a second attempt.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier::Error;
    ///
    /// assert!(Error::Timeout.is_retryable());
    /// assert!(!Error::Canceled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Transport(_) | Error::Timeout | Error::Body(_)
        )
    }

    /// Returns `true` for [`Error::Canceled`] and [`Error::DeadlineExceeded`].
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::UnexpectedStatus { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Wraps a failure reported by a custom [`Transport`](crate::Transport).
    ///
    /// # Examples
    ///
    /// ```
    /// use courier::Error;
    ///
    /// let err = Error::transport("connection refused");
    /// assert!(err.is_retryable());
    /// ```
    pub fn transport(source: impl Into<BoxError>) -> Self {
        Error::Transport(Arc::from(source.into()))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(Arc::new(err))
        }
    }

    /// Classifies an error raised while reading a response body.
    ///
    /// The gzip decoder reports malformed payloads as `InvalidData`.
    pub(crate) fn from_body_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::InvalidData {
            Error::decompress(err)
        } else {
            Error::Body(Arc::new(err))
        }
    }

    pub(crate) fn decompress(err: io::Error) -> Self {
        Error::Decompress(Arc::new(err))
    }

    pub(crate) fn configuration(op: &'static str, source: impl Into<BoxError>) -> Self {
        Error::Configuration {
            op,
            source: Arc::from(source.into()),
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io {
            op,
            source: Arc::new(source),
        }
    }

    pub(crate) fn redirect(source: impl Into<BoxError>) -> Self {
        Error::Redirect(Arc::from(source.into()))
    }

    pub(crate) fn hook(phase: HookPhase, index: usize, source: BoxError) -> Self {
        Error::HookAborted {
            phase,
            index,
            source: Arc::from(source),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::from_reqwest(err)
    }
}

/// A specialized `Result` type for HTTP calls.
pub type Result<T> = std::result::Result<T, Error>;
