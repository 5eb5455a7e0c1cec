//! HTTP client with session cookies, lifecycle hooks and retry logic.
//!
//! The [`Client`] type is the main entry point for making HTTP requests. It is
//! configured through `&mut self` setters and then shared freely: clones are
//! cheap, and a setter on one handle never affects other handles or calls
//! already in flight.

use crate::hooks::Hooks;
use crate::redirect::{self, RedirectAction, RedirectAttempt, RedirectPolicy};
use crate::response::RequestInfo;
use crate::retry::RetryPolicy;
use crate::transport::{
    HttpTransport, ProxyResolver, ProxySetting, RawResponse, TlsSettings, Transport,
    TransportConfig, TransportRequest,
};
use crate::{decode, Body, BoxError, Error, Request, RequestBuilder, Response, Result};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::cookie::{CookieStore, Jar};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// An HTTP client with retry logic, redirects, a cookie session and hooks.
///
/// The client is designed to be reused across multiple requests. It maintains
/// a connection pool and configuration that applies to all requests.
///
/// # Examples
///
/// ```no_run
/// use courier::{Client, RetryPolicy};
/// use courier::retry::RetryOn5xx;
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct CreateUser {
///     name: String,
/// }
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), courier::Error> {
/// let mut client = Client::new();
/// client
///     .set_timeout(Duration::from_secs(30))
///     .set_retry(RetryPolicy::new().max_attempts(3).trigger(RetryOn5xx))
///     .set_default_header("User-Agent", "my-app/1.0")?;
///
/// let user: User = client
///     .get("https://api.example.com/users/123")
///     .send()
///     .await
///     .ensure_status_2xx()
///     .json()
///     .await?;
/// println!("User: {}", user.name);
///
/// let created: User = client
///     .post("https://api.example.com/users")
///     .json(&CreateUser { name: "Alice".to_string() })
///     .send()
///     .await
///     .json()
///     .await?;
/// println!("Created user with ID: {}", created.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Clone)]
struct ClientInner {
    transport: TransportSlot,
    jar: Option<Arc<dyn CookieStore>>,
    redirect: RedirectPolicy,
    timeout: Option<Duration>,
    default_headers: HeaderMap,
    hooks: Hooks,
    retry: RetryPolicy,
}

#[derive(Clone)]
enum TransportSlot {
    Configurable(HttpTransport),
    Custom(Arc<dyn Transport>),
}

impl TransportSlot {
    fn as_transport(&self) -> &dyn Transport {
        match self {
            TransportSlot::Configurable(transport) => transport,
            TransportSlot::Custom(transport) => transport.as_ref(),
        }
    }
}

impl Client {
    /// Creates a client with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized. Use [`Client::try_new`]
    /// to handle that case.
    pub fn new() -> Self {
        Self::try_new().expect("TLS backend cannot be initialized")
    }

    /// Creates a client with the default configuration.
    ///
    /// The defaults are a 120 second timeout per exchange, an in-memory cookie
    /// jar, at most 10 redirects, the system proxy and a single attempt per call.
    pub fn try_new() -> Result<Self> {
        let transport = HttpTransport::new(TransportConfig::default())?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                transport: TransportSlot::Configurable(transport),
                jar: Some(Arc::new(Jar::default())),
                redirect: RedirectPolicy::default(),
                timeout: Some(DEFAULT_TIMEOUT),
                default_headers: HeaderMap::new(),
                hooks: Hooks::default(),
                retry: RetryPolicy::default(),
            }),
        })
    }

    fn inner_mut(&mut self) -> &mut ClientInner {
        Arc::make_mut(&mut self.inner)
    }

    /// Installs a custom transport.
    ///
    /// While it is installed, the TLS and proxy setters fail with
    /// [`Error::UnsupportedTransport`].
    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
        self.inner_mut().transport = TransportSlot::Custom(transport);
        self
    }

    /// Installs a configurable transport.
    pub fn set_http_transport(&mut self, transport: HttpTransport) -> &mut Self {
        self.inner_mut().transport = TransportSlot::Configurable(transport);
        self
    }

    /// The installed transport, if it is the configurable one.
    pub fn http_transport(&self) -> Option<&HttpTransport> {
        match &self.inner.transport {
            TransportSlot::Configurable(transport) => Some(transport),
            TransportSlot::Custom(_) => None,
        }
    }

    /// Sets the redirect policy.
    pub fn set_redirect(&mut self, policy: RedirectPolicy) -> &mut Self {
        self.inner_mut().redirect = policy;
        self
    }

    /// Returns redirect responses to the caller instead of following them.
    pub fn disable_redirect(&mut self) -> &mut Self {
        self.set_redirect(RedirectPolicy::none())
    }

    /// Replaces the cookie jar.
    pub fn set_cookie_jar(&mut self, jar: Arc<dyn CookieStore>) -> &mut Self {
        self.inner_mut().jar = Some(jar);
        self
    }

    /// Removes the cookie jar. Cookies are neither sent nor stored afterwards.
    pub fn disable_session(&mut self) -> &mut Self {
        self.inner_mut().jar = None;
        self
    }

    /// Sets the timeout of each physical exchange. `Duration::ZERO` disables it.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.inner_mut().timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Routes requests through the proxy chosen by `resolver`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedTransport`] if a custom transport is installed.
    pub fn set_proxy<F>(&mut self, resolver: F) -> Result<&mut Self>
    where
        F: Fn(&Url) -> Option<Url> + Send + Sync + 'static,
    {
        let resolver: ProxyResolver = Arc::new(resolver);
        self.reconfigure("Client::set_proxy", |config| {
            config.proxy = ProxySetting::Custom(resolver);
        })
    }

    /// Routes every request through the proxy at `proxy`.
    ///
    /// On failure the previous proxy setting stays in effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `proxy` is not a usable proxy URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier::Client;
    ///
    /// let mut client = Client::new();
    /// assert!(client.set_proxy_url("http://127.0.0.1:3128").is_ok());
    /// assert!(client.set_proxy_url("::not a url::").is_err());
    /// ```
    pub fn set_proxy_url(&mut self, proxy: &str) -> Result<&mut Self> {
        const OP: &str = "Client::set_proxy_url";
        let url = Url::parse(proxy).map_err(|e| Error::configuration(OP, e))?;
        self.reconfigure(OP, |config| config.proxy = ProxySetting::Url(url))
    }

    /// Connects directly, ignoring proxy environment variables.
    pub fn disable_proxy(&mut self) -> Result<&mut Self> {
        self.reconfigure("Client::disable_proxy", |config| {
            config.proxy = ProxySetting::Disabled;
        })
    }

    /// Replaces the TLS settings.
    pub fn set_tls(&mut self, tls: TlsSettings) -> Result<&mut Self> {
        self.reconfigure("Client::set_tls", |config| config.tls = tls)
    }

    /// Presents a client certificate. `pem` holds the certificate chain and the private key.
    pub fn set_client_identity(&mut self, pem: impl Into<Vec<u8>>) -> Result<&mut Self> {
        let pem = pem.into();
        self.reconfigure("Client::set_client_identity", |config| {
            config.tls.identity_pem = Some(pem);
        })
    }

    /// Trusts the root certificates in the PEM file at `path`, in addition to the current ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read or holds no
    /// valid certificate.
    pub fn append_root_certs(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        const OP: &str = "Client::append_root_certs";
        let pem = std::fs::read(path.as_ref()).map_err(|e| Error::configuration(OP, e))?;
        self.reconfigure(OP, |config| config.tls.root_certs_pem.push(pem))
    }

    /// Skips server certificate verification.
    pub fn disable_verify(&mut self) -> Result<&mut Self> {
        self.reconfigure("Client::disable_verify", |config| {
            config.tls.accept_invalid_certs = true;
        })
    }

    // Builds the new transport before committing, so a failure leaves the old one in place.
    fn reconfigure(
        &mut self,
        op: &'static str,
        apply: impl FnOnce(&mut TransportConfig),
    ) -> Result<&mut Self> {
        let TransportSlot::Configurable(current) = &self.inner.transport else {
            return Err(Error::UnsupportedTransport { op });
        };

        let mut config = current.config().clone();
        apply(&mut config);
        let transport = HttpTransport::new(config).map_err(|e| match e {
            Error::Configuration { source, .. } => Error::Configuration { op, source },
            other => other,
        })?;

        self.inner_mut().transport = TransportSlot::Configurable(transport);
        Ok(self)
    }

    /// Adds a header sent with every request that does not set it itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn set_default_header(
        &mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<&mut Self> {
        const OP: &str = "Client::set_default_header";
        let name = HeaderName::try_from(name.as_ref()).map_err(|e| Error::configuration(OP, e))?;
        let value =
            HeaderValue::try_from(value.as_ref()).map_err(|e| Error::configuration(OP, e))?;
        self.inner_mut().default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the default retry policy. Per-request policies override it field by field.
    pub fn set_retry(&mut self, retry: RetryPolicy) -> &mut Self {
        self.inner_mut().retry = retry;
        self
    }

    /// Appends a hook run before every request.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier::{BoxError, Client, Request};
    ///
    /// let mut client = Client::new();
    /// client.on_before_request(|request: &mut Request| -> Result<(), BoxError> {
    ///     request.headers_mut().insert("x-request-id", "42".parse()?);
    ///     Ok(())
    /// });
    /// ```
    pub fn on_before_request<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Request) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.inner_mut().hooks.push_before(Arc::new(hook));
        self
    }

    /// Appends a hook run after every response, failed ones included.
    pub fn on_after_response<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Response) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.inner_mut().hooks.push_after(Arc::new(hook));
        self
    }

    /// Stores `cookies` in the jar as if `url` had set them.
    pub fn set_cookies<'c>(
        &self,
        url: &str,
        cookies: impl IntoIterator<Item = cookie::Cookie<'c>>,
    ) -> Result<()> {
        let jar = self.jar()?;
        let url = Url::parse(url)?;
        let values: Vec<HeaderValue> = cookies
            .into_iter()
            .filter_map(|cookie| HeaderValue::try_from(cookie.to_string()).ok())
            .collect();
        jar.set_cookies(&mut values.iter(), &url);
        Ok(())
    }

    /// The cookies the jar would send to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCookieJar`] if the session is disabled and
    /// [`Error::NoCookies`] if no cookie matches.
    pub fn filter_cookies(&self, url: &str) -> Result<Vec<cookie::Cookie<'static>>> {
        let jar = self.jar()?;
        let url = Url::parse(url)?;
        let cookies: Vec<_> = jar
            .cookies(&url)
            .as_ref()
            .and_then(|header| header.to_str().ok())
            .map(|line| {
                cookie::Cookie::split_parse(line.to_owned())
                    .filter_map(|cookie| cookie.ok())
                    .collect()
            })
            .unwrap_or_default();

        if cookies.is_empty() {
            Err(Error::NoCookies)
        } else {
            Ok(cookies)
        }
    }

    /// The cookie called `name` the jar would send to `url`.
    pub fn filter_cookie(&self, url: &str, name: &str) -> Result<cookie::Cookie<'static>> {
        self.filter_cookies(url)?
            .into_iter()
            .find(|cookie| cookie.name() == name)
            .ok_or_else(|| Error::CookieNotFound(name.to_string()))
    }

    fn jar(&self) -> Result<&Arc<dyn CookieStore>> {
        self.inner.jar.as_ref().ok_or(Error::NoCookieJar)
    }

    /// Starts building a request bound to this client.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Some(self.clone()), method, url.into())
    }

    /// Starts a `GET` request.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Starts a `HEAD` request.
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Starts a `POST` request.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Starts a `PUT` request.
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Starts a `PATCH` request.
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Starts a `DELETE` request.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Executes `request`.
    ///
    /// Runs the before-request hooks, then up to `max_attempts` exchanges as
    /// the retry policy allows, then the after-response hooks. Never fails
    /// outright: any error ends up in the returned [`Response`].
    ///
    /// A single-use body is buffered once before the first attempt when more
    /// than one attempt is allowed, so every attempt sends the same bytes.
    pub async fn execute(&self, mut request: Request) -> Response {
        let inner = &self.inner;

        if let Err(err) = inner.hooks.run_before(&mut request) {
            tracing::warn!(
                error = %err,
                method = %request.method,
                url = %request.url,
                "Request aborted by hook"
            );
            return Response::from_error(err);
        }

        for (name, value) in &inner.default_headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }

        let retry = request
            .retry
            .take()
            .unwrap_or_default()
            .merge(&inner.retry)
            .resolve();
        let ctx = request.context.clone();

        if retry.max_attempts > 1 && request.body.is_stream() {
            let body = std::mem::take(&mut request.body);
            let drained = tokio::select! {
                biased;
                err = ctx.done() => Err(err),
                body = body.into_replayable() => {
                    body.map_err(|source| Error::io("Client::execute", source))
                }
            };
            match drained {
                Ok(body) => request.body = body,
                Err(err) => return Response::from_error(err),
            }
        }

        let info = Arc::new(RequestInfo {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.as_bytes().cloned(),
        });

        let started = Instant::now();
        let mut attempt = 0;

        let response = loop {
            attempt += 1;
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                attempt = attempt,
                "Executing HTTP request"
            );

            let body = request.body.take_for_attempt();
            let mut response = tokio::select! {
                biased;
                err = ctx.done() => Response::from_error(err),
                response = self.exchange(&request, body) => response,
            }
            .with_metrics(attempt, started.elapsed());

            if let Some(err) = ctx.err() {
                response.set_error(err);
                break response;
            }

            if let Some(err) = response.error() {
                tracing::warn!(
                    error = %err,
                    attempt = attempt,
                    method = %request.method,
                    url = %request.url,
                    "Request failed"
                );
            }

            if attempt >= retry.max_attempts || !retry.trigger.should_retry(&response) {
                break response;
            }

            let delay = retry.delay(attempt - 1, &response);
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = attempt,
                status = response.status().map(|s| s.as_u16()),
                "Retrying request after delay"
            );

            tokio::select! {
                biased;
                err = ctx.done() => {
                    response.set_error(err);
                    break response;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let latency = started.elapsed();
        let mut response = response
            .with_request(info)
            .with_metrics(attempt, latency);

        if let Some(status) = response.status() {
            tracing::info!(
                status = status.as_u16(),
                latency_ms = latency.as_millis() as u64,
                attempts = attempt,
                "Received HTTP response"
            );
        }

        inner.hooks.run_after(&mut response);
        response
    }

    /// One physical exchange. A deferred request error is reported only after
    /// the transport answered, alongside the undecoded response.
    async fn exchange(&self, request: &Request, body: Body) -> Response {
        let (method, raw) = match self.follow_redirects(request, body).await {
            Ok(hop) => hop,
            Err(err) => return Response::from_error(err),
        };

        if let Some(err) = request.error() {
            let mut response = Response::from_raw(raw);
            response.set_error(err.clone());
            return response;
        }

        decode_body(&method, raw).await
    }

    /// Sends the request, following redirects and maintaining the cookie jar.
    /// Returns the final response with the method that produced it.
    async fn follow_redirects(
        &self,
        request: &Request,
        body: Body,
    ) -> Result<(Method, RawResponse)> {
        let inner = &self.inner;
        let transport = inner.transport.as_transport();

        let mut method = request.method.clone();
        let mut url = request.url.clone();
        let mut headers = request.headers.clone();
        let mut body = body;
        let mut visited: Vec<Url> = Vec::new();

        let raw = loop {
            let mut hop_headers = headers.clone();
            if let Some(jar) = &inner.jar {
                add_jar_cookies(jar.as_ref(), &url, &mut hop_headers);
            }

            let replayable = body.is_replayable();
            let replay = body.as_bytes().cloned();
            let raw = transport
                .round_trip(TransportRequest {
                    method: method.clone(),
                    url: url.clone(),
                    headers: hop_headers,
                    body: std::mem::take(&mut body),
                    timeout: inner.timeout,
                })
                .await?;

            if let Some(jar) = &inner.jar {
                store_jar_cookies(jar.as_ref(), &raw);
            }
            visited.push(url.clone());

            let Some(hop) = redirect::next_hop(raw.status, &method) else {
                break raw;
            };
            let next = match redirect::location(&raw.headers, &url) {
                None => break raw,
                Some(Err(e)) => return Err(Error::redirect(e)),
                Some(Ok(next)) => next,
            };
            if hop.keep_body && !replayable {
                break raw;
            }

            let attempt = RedirectAttempt::new(raw.status, &next, &visited);
            if inner.redirect.check(&attempt).map_err(Error::redirect)? == RedirectAction::Stop {
                break raw;
            }

            tracing::debug!(
                status = raw.status.as_u16(),
                from = %url,
                to = %next,
                "Following redirect"
            );
            redirect::prepare_headers(&mut headers, &url, &next, hop.keep_body);
            body = match replay {
                Some(bytes) if hop.keep_body => Body::from(bytes),
                _ => Body::empty(),
            };
            method = hop.method;
            url = next;
        };

        Ok((method, raw))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport: &dyn fmt::Debug = match &self.inner.transport {
            TransportSlot::Configurable(transport) => transport,
            TransportSlot::Custom(_) => &"Custom(..)",
        };
        f.debug_struct("Client")
            .field("transport", transport)
            .field("session", &self.inner.jar.is_some())
            .field("redirect", &self.inner.redirect)
            .field("timeout", &self.inner.timeout)
            .field("default_headers", &self.inner.default_headers)
            .field("hooks", &self.inner.hooks)
            .field("retry", &self.inner.retry)
            .finish()
    }
}

fn add_jar_cookies(jar: &dyn CookieStore, url: &Url, headers: &mut HeaderMap) {
    let Some(stored) = jar.cookies(url) else {
        return;
    };

    let merged = match headers.get(COOKIE) {
        Some(existing) => {
            let mut line = existing.as_bytes().to_vec();
            line.extend_from_slice(b"; ");
            line.extend_from_slice(stored.as_bytes());
            HeaderValue::from_bytes(&line).unwrap_or(stored)
        }
        None => stored,
    };
    headers.insert(COOKIE, merged);
}

fn store_jar_cookies(jar: &dyn CookieStore, raw: &RawResponse) {
    let mut set_cookies = raw.headers.get_all(SET_COOKIE).iter().peekable();
    if set_cookies.peek().is_some() {
        jar.set_cookies(&mut set_cookies, &raw.url);
    }
}

// HEAD, 204 and 304 responses have no body to decode. A corrupt payload keeps
// the status and headers next to the error.
async fn decode_body(method: &Method, mut raw: RawResponse) -> Response {
    let gzip = raw
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("gzip"));

    if !gzip
        || raw.body.is_decompressing()
        || raw.content_length() == Some(0)
        || *method == Method::HEAD
        || raw.status == StatusCode::NO_CONTENT
        || raw.status == StatusCode::NOT_MODIFIED
    {
        return Response::from_raw(raw);
    }

    let body = std::mem::take(&mut raw.body);
    match decode::gunzip(body).await {
        Ok(body) => {
            raw.body = body;
            raw.headers.remove(CONTENT_ENCODING);
            raw.headers.remove(CONTENT_LENGTH);
            Response::from_raw(raw)
        }
        Err(err) => {
            let mut response = Response::from_raw(raw);
            response.set_error(Error::decompress(err));
            response
        }
    }
}
