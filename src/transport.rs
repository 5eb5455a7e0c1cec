//! The transport seam: one physical HTTP exchange.
//!
//! The [`Client`](crate::Client) owns everything above a single exchange
//! (hooks, redirects, cookies, retries, decompression). A [`Transport`] only
//! sends one request and hands back the raw response. [`HttpTransport`] is the
//! built-in, configurable implementation on top of `reqwest`; any other
//! implementation is treated as opaque, and the client's TLS and proxy
//! setters fail with [`Error::UnsupportedTransport`] while it is installed.

use crate::{Body, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use url::Url;

/// Sends a single request and returns the raw response.
///
/// Implementations must not follow redirects and must not decode the body.
///
/// # Examples
///
/// ```
/// use courier::{RawResponse, Result, Transport, TransportRequest};
/// use http::StatusCode;
///
/// struct AlwaysTeapot;
///
/// #[async_trait::async_trait]
/// impl Transport for AlwaysTeapot {
///     async fn round_trip(&self, request: TransportRequest) -> Result<RawResponse> {
///         Ok(RawResponse::new(StatusCode::IM_A_TEAPOT, request.url))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one exchange.
    async fn round_trip(&self, request: TransportRequest) -> Result<RawResponse>;
}

/// One outgoing exchange.
#[derive(Debug)]
pub struct TransportRequest {
    /// The request method.
    pub method: Method,
    /// The absolute request URL.
    pub url: Url,
    /// Headers to send, cookies from the jar included.
    pub headers: HeaderMap,
    /// The body for this exchange.
    pub body: Body,
    /// Upper bound for the whole exchange, body included.
    pub timeout: Option<Duration>,
}

/// A response as received from the transport, before any decoding.
#[derive(Debug)]
pub struct RawResponse {
    /// The response status.
    pub status: StatusCode,
    /// The HTTP version.
    pub version: Version,
    /// The response headers.
    pub headers: HeaderMap,
    /// The URL that produced this response.
    pub url: Url,
    /// The response body.
    pub body: ResponseBody,
}

impl RawResponse {
    /// Creates an HTTP/1.1 response with no headers and an empty body.
    pub fn new(status: StatusCode, url: Url) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            url,
            body: ResponseBody::empty(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<ResponseBody>) -> Self {
        self.body = body.into();
        self
    }

    /// The declared `Content-Length`, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

/// A streamed response body.
///
/// `decompressing` is set once the stream already yields decoded content,
/// which keeps the client from decoding it a second time.
pub struct ResponseBody {
    stream: BoxStream<'static, io::Result<Bytes>>,
    decompressing: bool,
}

impl ResponseBody {
    /// An empty body.
    pub fn empty() -> Self {
        Self::from_stream(futures_util::stream::empty())
    }

    /// A body holding `bytes`.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::from_stream(futures_util::stream::once(async move { Ok(bytes) }))
    }

    /// A body read from `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            decompressing: false,
        }
    }

    /// Marks the body as already decoded.
    pub fn decompressed(mut self) -> Self {
        self.decompressing = true;
        self
    }

    /// Returns `true` if the stream yields decoded content.
    pub fn is_decompressing(&self) -> bool {
        self.decompressing
    }

    /// Reads the next chunk.
    pub async fn chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.stream.next().await
    }

    pub(crate) fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        self.stream
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl Stream for ResponseBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("decompressing", &self.decompressing)
            .finish_non_exhaustive()
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Maps a request URL to the proxy it should go through, or `None` for a direct connection.
pub type ProxyResolver = Arc<dyn Fn(&Url) -> Option<Url> + Send + Sync>;

/// How [`HttpTransport`] picks a proxy.
#[derive(Clone, Default)]
pub enum ProxySetting {
    /// Honour the `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` environment.
    #[default]
    System,
    /// Always connect directly.
    Disabled,
    /// Send every request through this proxy.
    Url(Url),
    /// Ask a resolver per request.
    Custom(ProxyResolver),
}

impl fmt::Debug for ProxySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxySetting::System => f.write_str("System"),
            ProxySetting::Disabled => f.write_str("Disabled"),
            ProxySetting::Url(url) => f.debug_tuple("Url").field(&url.as_str()).finish(),
            ProxySetting::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// TLS settings for [`HttpTransport`].
///
/// Certificates and the client identity are PEM encoded. Roots are added on
/// top of the bundled webpki roots.
#[derive(Clone, Default)]
pub struct TlsSettings {
    /// Extra trusted root certificates, one PEM bundle per entry.
    pub root_certs_pem: Vec<Vec<u8>>,
    /// Client certificate chain and private key in one PEM document.
    pub identity_pem: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub accept_invalid_certs: bool,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("root_certs", &self.root_certs_pem.len())
            .field("identity", &self.identity_pem.as_ref().map(|_| "<redacted>"))
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Configuration of the built-in transport.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Proxy selection.
    pub proxy: ProxySetting,
    /// TLS settings.
    pub tls: TlsSettings,
}

/// The built-in transport, backed by a pooled `reqwest::Client`.
///
/// Never follows redirects and never decompresses; both are done by the
/// [`Client`](crate::Client).
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Builds a transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a certificate, identity or proxy
    /// cannot be used.
    pub fn new(config: TransportConfig) -> Result<Self> {
        const OP: &str = "HttpTransport::new";

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(config.tls.accept_invalid_certs);

        for pem in &config.tls.root_certs_pem {
            let certs = reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| Error::configuration(OP, e))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(pem) = &config.tls.identity_pem {
            let identity =
                reqwest::Identity::from_pem(pem).map_err(|e| Error::configuration(OP, e))?;
            builder = builder.identity(identity);
        }

        builder = match &config.proxy {
            ProxySetting::System => builder,
            ProxySetting::Disabled => builder.no_proxy(),
            ProxySetting::Url(url) => {
                let proxy = reqwest::Proxy::all(url.clone())
                    .map_err(|e| Error::configuration(OP, e))?;
                builder.proxy(proxy)
            }
            ProxySetting::Custom(resolver) => {
                let resolver = Arc::clone(resolver);
                builder.proxy(reqwest::Proxy::custom(move |url| resolver(url)))
            }
        };

        let client = builder.build().map_err(|e| Error::configuration(OP, e))?;

        Ok(Self { client, config })
    }

    /// The configuration this transport was built from.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, request: TransportRequest) -> Result<RawResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body.into_reqwest());
        }

        let response = builder.send().await.map_err(Error::from_reqwest)?;

        Ok(RawResponse {
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
            url: response.url().clone(),
            body: ResponseBody::from_stream(response.bytes_stream().map_err(io::Error::other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_identity_is_a_configuration_error() {
        let config = TransportConfig {
            tls: TlsSettings {
                identity_pem: Some(b"not a pem".to_vec()),
                ..TlsSettings::default()
            },
            ..TransportConfig::default()
        };

        let err = HttpTransport::new(config).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration {
                op: "HttpTransport::new",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_response_body_chunks() {
        let mut body = ResponseBody::from_stream(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]));
        assert!(!body.is_decompressing());

        assert_eq!(body.chunk().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(body.chunk().await.unwrap().unwrap(), Bytes::from_static(b"cd"));
        assert!(body.chunk().await.is_none());
    }

    #[test]
    fn test_content_length() {
        let url = Url::parse("http://localhost/").unwrap();
        let raw = RawResponse::new(StatusCode::OK, url)
            .with_header(http::header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert_eq!(raw.content_length(), Some(12));
    }
}
