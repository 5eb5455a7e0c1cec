//! Example demonstrating lifecycle hooks, the cookie session and cancellation.
//!
//! This example shows how to:
//! - Stamp every request from a before-request hook
//! - Reject responses from an after-response hook
//! - Share cookies across calls through the session jar
//! - Cancel a call from another task
//!
//! Run with: `cargo run --example hooks_and_session`

use courier::retry::{ConstantBackoff, RetryOn5xx};
use courier::{
    BoxError, CancellationToken, Client, Context, Cookie, Error, Request, Response, RetryPolicy,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BASE_URL: &str = "https://httpbin.org";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("courier=debug,hooks_and_session=info")
        .init();

    let mut client = Client::try_new()?;

    let next_id = Arc::new(AtomicU64::new(1));
    client
        .on_before_request(move |request: &mut Request| -> Result<(), BoxError> {
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            request
                .headers_mut()
                .insert("x-request-id", id.to_string().parse()?);
            Ok(())
        })
        .on_after_response(|response: &mut Response| -> Result<(), BoxError> {
            if response.header("x-maintenance").is_some() {
                return Err("service is in maintenance mode".into());
            }
            Ok(())
        });

    println!("=== Hooks ===");
    let echoed: serde_json::Value = client
        .get(format!("{BASE_URL}/headers"))
        .send()
        .await
        .ensure_status_ok()
        .json()
        .await?;
    println!("Server saw: {}", echoed["headers"]["X-Request-Id"]);
    println!();

    println!("=== Session ===");
    client.set_cookies(BASE_URL, [Cookie::new("theme", "dark")])?;
    client
        .get(format!("{BASE_URL}/cookies/set"))
        .query("session", "abc123")
        .send()
        .await
        .ensure_status_2xx()
        .raw()
        .await?;
    for cookie in client.filter_cookies(BASE_URL)? {
        println!("Jar holds {}={}", cookie.name(), cookie.value());
    }
    println!();

    println!("=== Cancellation ===");
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        })
    };

    let response = client
        .get(format!("{BASE_URL}/status/503"))
        .context(Context::background().with_cancel(token))
        .retry(
            RetryPolicy::new()
                .max_attempts(10)
                .wait_time(Duration::from_secs(5))
                .trigger(RetryOn5xx)
                .backoff(ConstantBackoff),
        )
        .send()
        .await;
    let _ = canceller.await;

    match response.error() {
        Some(err) if err.is_cancellation() => {
            println!("Canceled after {} attempts: {err}", response.attempts())
        }
        other => println!("Finished without cancellation: {other:?}"),
    }

    Ok(())
}
