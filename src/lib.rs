//! # Courier - a retry-aware HTTP client with sessions and hooks
//!
//! Courier is an HTTP client built on top of `reqwest`. A long-lived
//! [`Client`] owns the transport configuration, a cookie session, ordered
//! before/after hook chains and a default retry policy. Every call returns a
//! lazily consumed [`Response`] that carries either the received response or
//! the error that ended the call.
//!
//! ## Quick Start
//!
//! ```no_run
//! use courier::{Client, RetryPolicy};
//! use courier::retry::{ConstantBackoff, RetryOn5xx};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateUser {
//!     name: String,
//!     email: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), courier::Error> {
//!     let mut client = Client::new();
//!     client
//!         .set_timeout(Duration::from_secs(30))
//!         .set_retry(
//!             RetryPolicy::new()
//!                 .max_attempts(3)
//!                 .wait_time(Duration::from_millis(200))
//!                 .trigger(RetryOn5xx)
//!                 .backoff(ConstantBackoff),
//!         );
//!
//!     // Make a GET request
//!     let response = client.get("https://api.example.com/users/123").send().await;
//!     println!("Request took {:?} over {} attempts", response.latency(), response.attempts());
//!     let user: User = response.ensure_status_2xx().json().await?;
//!     println!("User: {}", user.name);
//!
//!     // Make a POST request
//!     let created: User = client
//!         .post("https://api.example.com/users")
//!         .json(&CreateUser {
//!             name: "Alice".to_string(),
//!             email: "alice@example.com".to_string(),
//!         })
//!         .send()
//!         .await
//!         .json()
//!         .await?;
//!     println!("Created user with ID: {}", created.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Retry loop** - separate trigger, backoff and attempt budget; per-request policies override the client default field by field
//! - **Cancellation** - a [`Context`] (token and/or deadline) aborts both an in-flight exchange and a pending backoff wait
//! - **Hooks** - ordered before-request and after-response chains that stop at the first failure
//! - **Session** - a cookie jar consulted and updated on every exchange and redirect hop
//! - **Redirects** - followed by the client with method rewriting and credential stripping
//! - **Transparent gzip** - responses declaring `Content-Encoding: gzip` are decoded while streaming
//! - **Lazy responses** - read the body once as bytes, text, JSON, a file or a diagnostic dump
//! - **Pluggable transport** - swap in any [`Transport`], e.g. for tests
//!
//! ## Error Handling
//!
//! A [`Response`] never hides its error: every body consumer returns the stored
//! error untouched.
//!
//! ```no_run
//! use courier::{Client, Error, ErrorKind};
//!
//! # async fn example() {
//! let client = Client::new();
//! match client.get("https://api.example.com/endpoint").send().await.ensure_status_ok().text().await {
//!     Ok(body) => println!("Success: {body}"),
//!     Err(Error::UnexpectedStatus { status, expected }) => {
//!         eprintln!("HTTP error {status}, wanted {expected}");
//!     }
//!     Err(e) if e.kind() == ErrorKind::Cancellation => eprintln!("gave up: {e}"),
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # }
//! ```
//!
//! ## The Default Client
//!
//! The package-level functions ([`get`], [`post`], ...) forward to a
//! process-wide client. It is created on first use, or installed beforehand
//! with [`init_default_client`], and cannot be reconfigured afterwards.

mod body;
mod client;
mod context;
mod decode;
mod error;
mod hooks;
pub mod multipart;
pub mod rate_limit;
pub mod redirect;
mod request;
mod response;
pub mod retry;
mod transport;

pub use body::Body;
pub use client::Client;
pub use context::Context;
pub use error::{BoxError, Error, ErrorKind, Result, SharedError, StatusExpectation};
pub use hooks::{AfterResponseHook, BeforeRequestHook, HookPhase};
pub use redirect::{RedirectAction, RedirectPolicy};
pub use request::{Request, RequestBuilder};
pub use response::Response;
pub use retry::{Backoff, RetryPolicy, Trigger};
pub use transport::{
    HttpTransport, ProxyResolver, ProxySetting, RawResponse, ResponseBody, TlsSettings,
    Transport, TransportConfig, TransportRequest,
};

pub use cookie::Cookie;
pub use reqwest::cookie::{CookieStore, Jar};
pub use tokio_util::sync::CancellationToken;

use http::Method;
use std::sync::OnceLock;

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// The process-wide client used by [`get`], [`post`] and the other
/// package-level functions, and by requests built with [`Request::builder`].
///
/// Created with [`Client::new`] on first use unless [`init_default_client`]
/// installed one before.
pub fn default_client() -> &'static Client {
    DEFAULT_CLIENT.get_or_init(Client::new)
}

/// Installs `client` as the process-wide default.
///
/// # Errors
///
/// Hands `client` back if the default client already exists.
pub fn init_default_client(client: Client) -> std::result::Result<(), Client> {
    DEFAULT_CLIENT.set(client)
}

/// Starts a request with the default client.
pub fn request(method: Method, url: impl Into<String>) -> RequestBuilder {
    default_client().request(method, url)
}

/// Starts a `GET` request with the default client.
pub fn get(url: impl Into<String>) -> RequestBuilder {
    default_client().get(url)
}

/// Starts a `HEAD` request with the default client.
pub fn head(url: impl Into<String>) -> RequestBuilder {
    default_client().head(url)
}

/// Starts a `POST` request with the default client.
pub fn post(url: impl Into<String>) -> RequestBuilder {
    default_client().post(url)
}

/// Starts a `PUT` request with the default client.
pub fn put(url: impl Into<String>) -> RequestBuilder {
    default_client().put(url)
}

/// Starts a `PATCH` request with the default client.
pub fn patch(url: impl Into<String>) -> RequestBuilder {
    default_client().patch(url)
}

/// Starts a `DELETE` request with the default client.
pub fn delete(url: impl Into<String>) -> RequestBuilder {
    default_client().delete(url)
}
