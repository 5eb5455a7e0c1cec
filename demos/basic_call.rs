//! Basic example demonstrating simple GET and POST requests.
//!
//! This example shows how to:
//! - Configure a client
//! - Make GET requests and decode JSON
//! - Make POST requests with a JSON body
//! - Inspect response metadata before consuming the body
//!
//! Run with: `cargo run --example basic_call`

use courier::{Client, Error};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

const BASE_URL: &str = "https://jsonplaceholder.typicode.com";

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("courier=debug,basic_call=info")
        .init();

    let mut client = Client::try_new()?;
    client
        .set_timeout(Duration::from_secs(10))
        .set_default_header("Accept", "application/json")?;

    println!("=== GET Request Example ===");
    let response = client
        .get(format!("{BASE_URL}/posts/{{id}}"))
        .path_param("id", "1")
        .send()
        .await;

    println!("Status code: {:?}", response.status());
    println!("Content-Type: {:?}", response.header("content-type"));
    println!("Request latency: {:?}", response.latency());

    let post: Post = response.ensure_status_ok().json().await?;
    println!("Post ID: {}", post.id);
    println!("Title: {}", post.title);
    println!("Body: {}", post.body);
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };

    let created: Post = client
        .post(format!("{BASE_URL}/posts"))
        .json(&new_post)
        .send()
        .await
        .ensure_status(http::StatusCode::CREATED)
        .json()
        .await?;
    println!("Created post ID: {}", created.id);
    println!("Title: {}", created.title);
    println!();

    println!("=== Dumping an Exchange ===");
    let mut dump = Vec::new();
    client
        .get(format!("{BASE_URL}/posts/1/comments"))
        .query("_limit", "1")
        .send()
        .await
        .verbose(&mut dump)
        .await?;
    println!("{}", String::from_utf8_lossy(&dump));

    Ok(())
}
