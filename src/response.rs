//! The lazily consumed [`Response`] wrapper.
//!
//! A [`Response`] holds either a received response whose body has not been
//! read yet, or a terminal error (possibly alongside the response that led
//! to it). Body consumers take `self`, so a body can be read at most once,
//! and every consumer returns the terminal error untouched instead of doing
//! any I/O once one is stored.

use crate::error::StatusExpectation;
use crate::transport::{RawResponse, ResponseBody};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use http::header::{AsHeaderName, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::{StreamReader, SyncIoBridge};
use url::Url;

/// What was sent, kept for [`Response::verbose`].
#[derive(Debug)]
pub(crate) struct RequestInfo {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
}

#[derive(Debug)]
enum State {
    Received(RawResponse),
    Failed(Error, Option<RawResponse>),
}

/// The outcome of a call.
///
/// # Examples
///
/// ```no_run
/// use courier::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), courier::Error> {
/// let client = Client::new();
/// let response = client.get("https://api.example.com/users/123").send().await;
///
/// println!("Status: {:?}", response.status());
/// println!("Request took {:?}", response.latency());
/// println!("Attempts: {}", response.attempts());
///
/// let user: User = response.ensure_status_2xx().json().await?;
/// println!("User: {}", user.name);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    state: State,
    request: Option<Arc<RequestInfo>>,
    attempts: usize,
    latency: Duration,
}

impl Response {
    pub(crate) fn from_raw(raw: RawResponse) -> Self {
        Self {
            state: State::Received(raw),
            request: None,
            attempts: 1,
            latency: Duration::ZERO,
        }
    }

    pub(crate) fn from_error(error: Error) -> Self {
        Self {
            state: State::Failed(error, None),
            request: None,
            attempts: 0,
            latency: Duration::ZERO,
        }
    }

    pub(crate) fn with_request(mut self, request: Arc<RequestInfo>) -> Self {
        self.request = Some(request);
        self
    }

    pub(crate) fn with_metrics(mut self, attempts: usize, latency: Duration) -> Self {
        self.attempts = attempts;
        self.latency = latency;
        self
    }

    /// Replaces the terminal error, keeping any received response.
    pub(crate) fn set_error(&mut self, error: Error) {
        let raw = match std::mem::replace(&mut self.state, State::Failed(error, None)) {
            State::Received(raw) => Some(raw),
            State::Failed(_, raw) => raw,
        };
        if let State::Failed(_, slot) = &mut self.state {
            *slot = raw;
        }
    }

    /// The terminal error, if any.
    pub fn error(&self) -> Option<&Error> {
        match &self.state {
            State::Failed(error, _) => Some(error),
            State::Received(_) => None,
        }
    }

    fn received(&self) -> Option<&RawResponse> {
        match &self.state {
            State::Received(raw) | State::Failed(_, Some(raw)) => Some(raw),
            State::Failed(_, None) => None,
        }
    }

    /// The status of the received response.
    ///
    /// Still available when a status assertion or an after-response hook
    /// stored an error; `None` if nothing was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.received().map(|raw| raw.status)
    }

    /// The headers of the received response.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.received().map(|raw| &raw.headers)
    }

    /// A single header of the received response.
    pub fn header(&self, name: impl AsHeaderName) -> Option<&HeaderValue> {
        self.headers()?.get(name)
    }

    /// The URL that produced the response, after redirects.
    pub fn url(&self) -> Option<&Url> {
        self.received().map(|raw| &raw.url)
    }

    /// The number of physical exchanges made, retries included.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Time from the first attempt until the final response arrived, backoff waits included.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Returns `true` if more than one attempt was made.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Hands out the underlying response, or the terminal error.
    pub fn resolve(self) -> Result<RawResponse> {
        match self.state {
            State::Received(raw) => Ok(raw),
            State::Failed(error, _) => Err(error),
        }
    }

    /// Reads the whole body.
    pub async fn raw(self) -> Result<Bytes> {
        let mut body = self.resolve()?.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.chunk().await {
            buf.extend_from_slice(&chunk.map_err(Error::from_body_io)?);
        }
        Ok(buf.freeze())
    }

    /// Reads the whole body as text. Invalid UTF-8 is replaced.
    pub async fn text(self) -> Result<String> {
        let bytes = self.raw().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decodes the body as JSON while it streams in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] if the body is not valid JSON
    /// for `T`, or the body-read error if the stream fails first.
    pub async fn json<T>(self) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let raw = self.resolve()?;
        let status = raw.status;
        let reader = SyncIoBridge::new(StreamReader::new(raw.body));

        let decoded = tokio::task::spawn_blocking(move || serde_json::from_reader::<_, T>(reader))
            .await
            .map_err(|e| Error::io("Response::json", io::Error::other(e)))?;

        decoded.map_err(|source| match source.io_error_kind() {
            Some(kind) => Error::from_body_io(io::Error::new(kind, source)),
            None => {
                tracing::error!(error = %source, status = status.as_u16(), "Failed to deserialize response");
                Error::DeserializationFailed {
                    status,
                    source: Arc::new(source),
                }
            }
        })
    }

    /// Streams the body into a file created (or truncated) at `path`.
    ///
    /// `perm` is the Unix mode of a newly created file and is ignored on
    /// other platforms. A partially written file is removed if reading the
    /// body or writing the file fails.
    pub async fn save(self, path: impl AsRef<Path>, perm: u32) -> Result<()> {
        let path = path.as_ref();
        let body = self.resolve()?.body;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(perm);
        #[cfg(not(unix))]
        let _ = perm;

        let file = options
            .open(path)
            .await
            .map_err(|source| Error::io(SAVE_OP, source))?;

        write_or_remove(body, file, path).await?;
        tracing::debug!(path = %path.display(), "Saved response body");
        Ok(())
    }

    /// Writes a human-readable dump of the request and response to `writer`.
    ///
    /// The response body is consumed. The request body is included when it
    /// was replayable.
    pub async fn verbose<W: Write>(self, writer: &mut W) -> Result<()> {
        let request = self.request.clone();
        let raw = self.resolve()?;
        let version = raw.version;
        let status = raw.status;
        let headers = raw.headers.clone();
        let body = Response::from_raw(raw).raw().await?;

        let io_err = |source: io::Error| Error::io("Response::verbose", source);

        if let Some(request) = request {
            let target = &request.url[url::Position::BeforePath..url::Position::AfterQuery];
            let host = &request.url[url::Position::BeforeHost..url::Position::AfterPort];
            writeln!(writer, "> {} {} {:?}", request.method, target, version).map_err(io_err)?;
            writeln!(writer, "> Host: {host}").map_err(io_err)?;
            write_headers(writer, '>', &request.headers).map_err(io_err)?;
            writeln!(writer, ">").map_err(io_err)?;
            if let Some(body) = request.body.as_ref().filter(|b| !b.is_empty()) {
                writer.write_all(body).map_err(io_err)?;
                writeln!(writer).map_err(io_err)?;
            }
        }

        writeln!(writer, "< {version:?} {status}").map_err(io_err)?;
        write_headers(writer, '<', &headers).map_err(io_err)?;
        writeln!(writer, "<").map_err(io_err)?;
        writer.write_all(&body).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }

    /// Stores a status assertion error unless the status is exactly `expected`.
    ///
    /// Never reads the body. A response that already carries an error is
    /// returned unchanged.
    pub fn ensure_status(self, expected: StatusCode) -> Self {
        self.ensure(StatusExpectation::Exact(expected), |status| {
            status == expected
        })
    }

    /// Stores a status assertion error unless the status is 2xx.
    pub fn ensure_status_2xx(self) -> Self {
        self.ensure(StatusExpectation::Success, |status| status.is_success())
    }

    /// Same as `ensure_status(StatusCode::OK)`.
    pub fn ensure_status_ok(self) -> Self {
        self.ensure_status(StatusCode::OK)
    }

    fn ensure(mut self, expected: StatusExpectation, ok: impl FnOnce(StatusCode) -> bool) -> Self {
        if let State::Received(raw) = &self.state {
            let status = raw.status;
            if !ok(status) {
                self.set_error(Error::UnexpectedStatus { status, expected });
            }
        }
        self
    }

    /// The cookies set by the response's `Set-Cookie` headers.
    ///
    /// # Errors
    ///
    /// Returns the stored error if the response failed, otherwise
    /// [`Error::NoCookies`] if the response set no cookies.
    pub fn cookies(&self) -> Result<Vec<cookie::Cookie<'static>>> {
        if let Some(err) = self.error() {
            return Err(err.clone());
        }

        let cookies: Vec<_> = self
            .headers()
            .into_iter()
            .flat_map(|headers| headers.get_all(SET_COOKIE))
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| cookie::Cookie::parse(value.to_owned()).ok())
            .collect();

        if cookies.is_empty() {
            Err(Error::NoCookies)
        } else {
            Ok(cookies)
        }
    }

    /// The cookie called `name` set by the response.
    pub fn cookie(&self, name: &str) -> Result<cookie::Cookie<'static>> {
        self.cookies()?
            .into_iter()
            .find(|cookie| cookie.name() == name)
            .ok_or_else(|| Error::CookieNotFound(name.to_string()))
    }
}

const SAVE_OP: &str = "Response::save";

// Removes `path` if the body cannot be fully written out.
async fn write_or_remove<W>(mut body: ResponseBody, mut writer: W, path: &Path) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        while let Some(chunk) = body.chunk().await {
            let chunk = chunk.map_err(Error::from_body_io)?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| Error::io(SAVE_OP, source))?;
        }
        writer
            .flush()
            .await
            .map_err(|source| Error::io(SAVE_OP, source))
    }
    .await;

    if let Err(err) = &written {
        drop(writer);
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(error = %e, path = %path.display(), "Failed to remove partial file");
        }
        tracing::debug!(error = %err, path = %path.display(), "Discarded partial response body");
    }
    written
}

fn write_headers<W: Write>(writer: &mut W, prefix: char, headers: &HeaderMap) -> io::Result<()> {
    for (name, value) in headers {
        writeln!(
            writer,
            "{prefix} {}: {}",
            name,
            String::from_utf8_lossy(value.as_bytes())
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ResponseBody;

    fn received(status: u16, body: &'static str) -> Response {
        let raw = RawResponse::new(
            StatusCode::from_u16(status).unwrap(),
            Url::parse("http://localhost/").unwrap(),
        )
        .with_body(body);
        Response::from_raw(raw)
    }

    #[tokio::test]
    async fn test_text_and_raw() {
        assert_eq!(received(200, "hello").text().await.unwrap(), "hello");
        assert_eq!(
            received(200, "bytes").raw().await.unwrap(),
            Bytes::from_static(b"bytes")
        );
    }

    #[tokio::test]
    async fn test_failed_assertion_keeps_status_and_hides_body() {
        let response = received(404, "not found").ensure_status_ok();
        assert_eq!(response.status(), Some(StatusCode::NOT_FOUND));
        assert!(matches!(
            response.error(),
            Some(Error::UnexpectedStatus {
                status: StatusCode::NOT_FOUND,
                expected: StatusExpectation::Exact(StatusCode::OK),
            })
        ));

        let err = response.raw().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus { .. }));
    }

    #[tokio::test]
    async fn test_assertion_does_not_replace_existing_error() {
        let response = Response::from_error(Error::Timeout).ensure_status_2xx();
        assert!(matches!(response.error(), Some(Error::Timeout)));
        assert!(received(204, "").ensure_status_2xx().error().is_none());
    }

    #[tokio::test]
    async fn test_json_errors() {
        #[derive(Debug, serde::Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            id: u64,
        }

        let err = received(200, "{\"id\": \"nope\"}")
            .json::<Payload>()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DeserializationFailed {
                status: StatusCode::OK,
                ..
            }
        ));

        let broken = RawResponse::new(StatusCode::OK, Url::parse("http://localhost/").unwrap())
            .with_body(ResponseBody::from_stream(futures_util::stream::iter(vec![
                Ok(Bytes::from_static(b"{\"id\":")),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            ])));
        let err = Response::from_raw(broken)
            .json::<Payload>()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Body(_)), "got {err:?}");
    }

    #[test]
    fn test_cookies() {
        let raw = RawResponse::new(StatusCode::OK, Url::parse("http://localhost/").unwrap())
            .with_header(SET_COOKIE, HeaderValue::from_static("session=abc; Path=/"))
            .with_header(SET_COOKIE, HeaderValue::from_static("theme=dark"));
        let response = Response::from_raw(raw);

        assert_eq!(response.cookies().unwrap().len(), 2);
        assert_eq!(response.cookie("session").unwrap().value(), "abc");
        assert!(matches!(
            response.cookie("missing"),
            Err(Error::CookieNotFound(name)) if name == "missing"
        ));
        assert!(matches!(received(200, "").cookies(), Err(Error::NoCookies)));
    }

    #[test]
    fn test_cookies_report_stored_error() {
        let raw = RawResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Url::parse("http://localhost/").unwrap(),
        )
        .with_header(SET_COOKIE, HeaderValue::from_static("sid=abc"));
        let response = Response::from_raw(raw).ensure_status_ok();

        assert!(matches!(
            response.cookies(),
            Err(Error::UnexpectedStatus {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            })
        ));
        assert!(matches!(
            response.cookie("sid"),
            Err(Error::UnexpectedStatus { .. })
        ));
        assert_eq!(response.header(SET_COOKIE).unwrap(), "sid=abc");
    }

    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::Error::other("no space left on device")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        std::fs::write(&path, b"stale").unwrap();

        let err = write_or_remove(ResponseBody::from_bytes("payload"), FullDisk, &path)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Io { op: "Response::save", .. }), "got {err:?}");
        assert!(!path.exists());
    }

    #[test]
    fn test_set_error_keeps_received_response() {
        let mut response = received(500, "");
        response.set_error(Error::Canceled);
        response.set_error(Error::DeadlineExceeded);
        assert!(matches!(response.error(), Some(Error::DeadlineExceeded)));
        assert_eq!(response.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
