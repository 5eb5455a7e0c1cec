//! Example demonstrating custom retry triggers and backoff functions.
//!
//! This example shows how to:
//! - Implement a domain-specific trigger
//! - Combine triggers with AND/OR logic
//! - Use closures as triggers and backoff functions
//! - Honor `Retry-After` headers
//! - Bound a retrying call with a timeout
//!
//! Run with: `cargo run --example custom_retry`

use courier::retry::{
    AndTrigger, ExponentialBackoff, OrTrigger, RetryAfterBackoff, RetryOn5xx, RetryOnStatus,
    RetryOnTimeout,
};
use courier::{Client, Error, Response, RetryPolicy, Trigger};
use http::StatusCode;
use std::time::Duration;

const BASE_URL: &str = "https://httpbin.org";

/// Retries gateway errors that the server marked as transient.
struct RetryOnTransientGateway;

impl Trigger for RetryOnTransientGateway {
    fn should_retry(&self, response: &Response) -> bool {
        let gateway = matches!(
            response.status(),
            Some(StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT)
        );
        let transient = response
            .header("x-transient")
            .is_some_and(|value| value == "true");
        gateway && transient
    }
}

fn report(label: &str, response: &Response) {
    match response.error() {
        Some(err) => println!("{label}: failed after {} attempts: {err}", response.attempts()),
        None => println!(
            "{label}: {:?} after {} attempts in {:?}",
            response.status(),
            response.attempts(),
            response.latency()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("courier=info,custom_retry=info")
        .init();

    let mut client = Client::try_new()?;
    client.set_retry(
        RetryPolicy::new()
            .max_attempts(3)
            .wait_time(Duration::from_millis(100))
            .max_wait_time(Duration::from_secs(2)),
    );

    println!("=== Example 1: Retry on Rate Limits ===");
    let response = client
        .get(format!("{BASE_URL}/status/429"))
        .retry(
            RetryPolicy::new()
                .trigger(RetryOnStatus(vec![StatusCode::TOO_MANY_REQUESTS]))
                .backoff(RetryAfterBackoff::new(ExponentialBackoff { jitter: true })),
        )
        .send()
        .await;
    report("rate limit", &response);
    println!();

    println!("=== Example 2: Combining Triggers with OR ===");
    let response = client
        .get(format!("{BASE_URL}/status/503"))
        .retry(RetryPolicy::new().trigger(OrTrigger::new(vec![
            Box::new(RetryOn5xx),
            Box::new(RetryOnTimeout),
        ])))
        .send()
        .await;
    report("5xx or timeout", &response);
    println!();

    println!("=== Example 3: Combining Triggers with AND ===");
    let response = client
        .get(format!("{BASE_URL}/status/502"))
        .retry(RetryPolicy::new().trigger(AndTrigger::new(vec![
            Box::new(RetryOn5xx),
            Box::new(RetryOnTransientGateway),
        ])))
        .send()
        .await;
    report("transient gateway", &response);
    println!();

    println!("=== Example 4: Closures ===");
    let response = client
        .get(format!("{BASE_URL}/status/500"))
        .retry(
            RetryPolicy::new()
                .max_attempts(4)
                .trigger(|response: &Response| {
                    response.status().is_some_and(|s| s.is_server_error())
                })
                .backoff(
                    |wait: Duration, max: Duration, attempt: usize, _: &Response| {
                        (wait * (attempt as u32 + 1)).min(max)
                    },
                ),
        )
        .send()
        .await;
    report("closures", &response);
    println!();

    println!("=== Example 5: Bounding the Whole Call ===");
    let response = client
        .get(format!("{BASE_URL}/delay/5"))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    report("deadline", &response);

    Ok(())
}
