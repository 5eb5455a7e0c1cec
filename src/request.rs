//! Requests and the request builder.

use crate::{
    body::Body, context::Context, multipart::Form, retry::RetryPolicy, Client, Error, Response,
    Result,
};
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use std::time::Duration;
use tokio::io::AsyncRead;
use url::Url;

/// A fully built HTTP request, owned by the caller until it is executed.
///
/// Before-request hooks receive a `&mut Request` and may edit any part of it.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
    pub(crate) context: Context,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) error: Option<Error>,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::empty(),
            context: Context::background(),
            retry: None,
            error: None,
        }
    }

    /// Starts building a request that will be sent with the default client.
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(None, method, url.into())
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Mutable access to the HTTP method.
    pub fn method_mut(&mut self) -> &mut Method {
        &mut self.method
    }

    /// The target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Mutable access to the target URL.
    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The request body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replaces the request body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// The cancellation context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Replaces the cancellation context.
    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    /// The per-request retry override, if any.
    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Sets a per-request retry override. Unset fields inherit the client default.
    pub fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = Some(retry);
    }

    /// The deferred error recorded while building the request, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Records a deferred error. The first recorded error wins.
    ///
    /// The request is still sent. Each attempt then reports this error
    /// instead of decoding the response it received.
    pub fn set_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

// Characters that would end or restructure a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Builder for a [`Request`].
///
/// Obtained from [`Client::request`] (or one of its method shorthands) or
/// from [`Request::builder`]. Option failures such as an invalid header value
/// are recorded and reported when the request is executed, so the builder
/// chain itself never fails.
///
/// # Examples
///
/// ```no_run
/// use courier::{Client, RetryPolicy};
/// use std::time::Duration;
///
/// # async fn example() -> courier::Result<()> {
/// let client = Client::new();
/// let user: serde_json::Value = client
///     .get("https://api.example.com/users/{id}")
///     .path_param("id", "42")
///     .query("fields", "name,email")
///     .bearer_auth("token")
///     .timeout(Duration::from_secs(5))
///     .retry(RetryPolicy::new().max_attempts(3))
///     .send()
///     .await
///     .ensure_status_2xx()
///     .json()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[must_use = "a RequestBuilder does nothing until it is sent"]
#[derive(Debug)]
pub struct RequestBuilder {
    client: Option<Client>,
    method: Method,
    url: String,
    path_params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    cookies: Vec<String>,
    body: Body,
    context: Context,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    error: Option<Error>,
}

impl RequestBuilder {
    pub(crate) fn new(client: Option<Client>, method: Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            path_params: Vec::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Body::empty(),
            context: Context::background(),
            timeout: None,
            retry: None,
            error: None,
        }
    }

    /// Sets a header, replacing any previous value with the same name.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match parse_header(name.as_ref(), value.as_ref()) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.fail(e),
        }
        self
    }

    /// Merges a header map into the request headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Appends several query parameters.
    pub fn query_pairs<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Substitutes `{key}` placeholders in the URL with `value`, percent-encoded
    /// as a single path segment.
    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.push((key.into(), value.into()));
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Streams the body from `reader`.
    ///
    /// The stream is read once; it is buffered before the first attempt only
    /// when the retry policy allows more than one.
    pub fn body_reader<R>(self, reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        self.body(Body::from_reader(reader))
    }

    /// Sets a `text/plain` body.
    pub fn text(self, text: impl Into<String>) -> Self {
        let text: String = text.into();
        self.content_type("text/plain; charset=utf-8").body(text)
    }

    /// Sets a JSON body and the matching `Content-Type`.
    ///
    /// A serialization failure is recorded and reported when the request is executed.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.content_type("application/json").body(bytes),
            Err(e) => {
                self.fail(Error::SerializationFailed(e.to_string()));
                self
            }
        }
    }

    /// Sets an `application/x-www-form-urlencoded` body.
    pub fn form<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.content_type("application/x-www-form-urlencoded")
            .body(encoded)
    }

    /// Sets a `multipart/form-data` body.
    pub fn multipart(self, form: Form) -> Self {
        let content_type = form.content_type();
        self.content_type(&content_type).body(form.encode())
    }

    /// Adds a cookie to the `Cookie` header of this request.
    pub fn cookie(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.cookies
            .push(format!("{}={}", name.as_ref(), value.as_ref()));
        self
    }

    /// Sets HTTP basic authentication.
    pub fn basic_auth(self, username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", username.as_ref(), password.as_ref()));
        self.header(AUTHORIZATION, format!("Basic {credentials}"))
    }

    /// Sets a bearer token.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        self.header(AUTHORIZATION, format!("Bearer {}", token.as_ref()))
    }

    /// Bounds the whole call, retries and backoff included.
    ///
    /// The timeout is turned into a context deadline when the request is built.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Binds the call to a cancellation context.
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Overrides the client's retry policy for this call.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed. Option failures are not
    /// reported here; they are kept in the request's deferred error slot.
    pub fn build(self) -> Result<Request> {
        self.into_parts().1
    }

    /// Builds the request and executes it.
    ///
    /// Uses the client the builder came from, or the default client.
    pub async fn send(self) -> Response {
        let (client, request) = self.into_parts();
        let client = client.unwrap_or_else(|| crate::default_client().clone());
        match request {
            Ok(request) => client.execute(request).await,
            Err(err) => Response::from_error(err),
        }
    }

    fn content_type(self, value: &str) -> Self {
        self.header(CONTENT_TYPE, value)
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn into_parts(self) -> (Option<Client>, Result<Request>) {
        let RequestBuilder {
            client,
            method,
            mut url,
            path_params,
            query,
            mut headers,
            cookies,
            body,
            mut context,
            timeout,
            retry,
            error,
        } = self;

        for (key, value) in &path_params {
            let segment = utf8_percent_encode(value, PATH_SEGMENT).to_string();
            url = url.replace(&format!("{{{key}}}"), &segment);
        }
        let mut url = match Url::parse(&url) {
            Ok(url) => url,
            Err(e) => return (client, Err(Error::InvalidUrl(e))),
        };
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(&query);
        }

        let mut error = error;
        if !cookies.is_empty() {
            let mut line = cookies.join("; ");
            if let Some(existing) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
                line = format!("{existing}; {line}");
            }
            match HeaderValue::try_from(line) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(e) => {
                    error.get_or_insert(Error::configuration("RequestBuilder::cookie", e));
                }
            }
        }

        if let Some(timeout) = timeout {
            context = context.with_timeout(timeout);
        }

        let request = Request {
            method,
            url,
            headers,
            body,
            context,
            retry,
            error,
        };
        (client, Ok(request))
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::configuration("RequestBuilder::header", e))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::configuration("RequestBuilder::header", e))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn build(builder: RequestBuilder) -> Request {
        builder.build().unwrap()
    }

    #[test]
    fn test_path_params_and_query() {
        let request = build(
            Request::builder(Method::GET, "https://api.example.com/users/{id}/posts")
                .path_param("id", "42")
                .query("page", "2")
                .query_pairs([("sort", "desc")]),
        );
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/users/42/posts?page=2&sort=desc"
        );
    }

    #[test]
    fn test_path_param_is_encoded_as_one_segment() {
        let request = build(
            Request::builder(Method::GET, "https://api.example.com/files/{name}")
                .path_param("name", "a/b?c #1"),
        );
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/files/a%2Fb%3Fc%20%231"
        );
        assert_eq!(request.url().query(), None);
    }

    #[test]
    fn test_invalid_url_fails_build() {
        let result = Request::builder(Method::GET, "not a url").build();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_invalid_header_is_deferred() {
        let request = build(
            Request::builder(Method::GET, "http://localhost/")
                .header("bad header", "x")
                .header("x-ok", "1"),
        );
        assert!(matches!(request.error(), Some(Error::Configuration { .. })));
        assert!(request.headers().contains_key("x-ok"));
    }

    #[test]
    fn test_json_serialization_failure_is_deferred() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not valid JSON object keys");
        let request = build(Request::builder(Method::POST, "http://localhost/").json(&map));
        assert!(matches!(request.error(), Some(Error::SerializationFailed(_))));
    }

    #[test]
    fn test_json_body() {
        let request = build(
            Request::builder(Method::POST, "http://localhost/")
                .json(&serde_json::json!({"name": "Alice"})),
        );
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            request.body().as_bytes().map(|b| b.to_vec()),
            Some(br#"{"name":"Alice"}"#.to_vec())
        );
    }

    #[test]
    fn test_form_body() {
        let request = build(
            Request::builder(Method::POST, "http://localhost/")
                .form([("q", "rust lang"), ("n", "1&2")]),
        );
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(
            request.body().as_bytes().map(|b| b.to_vec()),
            Some(b"q=rust+lang&n=1%262".to_vec())
        );
    }

    #[test]
    fn test_auth_and_cookies() {
        let request = build(
            Request::builder(Method::GET, "http://localhost/")
                .basic_auth("user", "pass")
                .cookie("a", "1")
                .cookie("b", "2"),
        );
        assert_eq!(request.headers()[AUTHORIZATION], "Basic dXNlcjpwYXNz");
        assert_eq!(request.headers()[COOKIE], "a=1; b=2");

        let request =
            build(Request::builder(Method::GET, "http://localhost/").bearer_auth("t0k3n"));
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer t0k3n");
    }

    #[test]
    fn test_reader_body_is_single_use() {
        let request = build(
            Request::builder(Method::PUT, "http://localhost/")
                .body_reader(std::io::Cursor::new(b"streamed".to_vec())),
        );
        assert!(!request.body().is_replayable());
        assert_eq!(request.body().content_length(), None);
    }

    #[tokio::test]
    async fn test_timeout_becomes_deadline() {
        let request = build(
            Request::builder(Method::GET, "http://localhost/").timeout(Duration::from_secs(3)),
        );
        assert!(request.context().deadline().is_some());
        assert!(request.context().err().is_none());
    }

    #[test]
    fn test_first_deferred_error_wins() {
        let mut request = build(Request::builder(Method::GET, "http://localhost/"));
        request.set_error(Error::Timeout);
        request.set_error(Error::Canceled);
        assert!(matches!(request.error(), Some(Error::Timeout)));
    }
}
