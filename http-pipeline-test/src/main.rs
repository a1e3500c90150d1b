//! End-to-end checks for the pipeline over real loopback sockets.
//!
//! Each scenario starts its own axum server, drives requests through a
//! `HyperTransport`-backed pipeline, and reports PASS or FAIL. Set `RUST_LOG`
//! (for example `RUST_LOG=http_pipeline=debug`) to see pipeline logs.

mod server;

mod cancellation;
mod connection_refused;
mod network_timeout;
mod retry_status;
mod scoped_headers;

use std::time::Duration;

use http_pipeline::{HyperTransport, PipelineOptions, RetryOptions};
use tracing_subscriber::EnvFilter;

/// Options shared by every scenario: the real transport and short backoff.
pub fn base_options() -> anyhow::Result<PipelineOptions> {
    Ok(PipelineOptions::new()
        .transport(HyperTransport::new()?)
        .retry(
            RetryOptions::new()
                .base_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(100)),
        ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Pipeline Integration Tests ===");

    let results = vec![
        ("retry on 503", retry_status::run().await),
        ("network timeout is retried", network_timeout::run().await),
        ("connection refused", connection_refused::run().await),
        ("request-scoped headers", scoped_headers::run().await),
        ("cancel in-flight request", cancellation::run().await),
    ];

    let total = results.len();
    let mut passed = 0;
    for (label, result) in results {
        match result {
            Ok(()) => {
                println!("  PASS  {label}");
                passed += 1;
            }
            Err(e) => println!("  FAIL  {label}: {e:#}"),
        }
    }

    println!();
    println!("{passed}/{total} passed");

    if passed < total {
        std::process::exit(1);
    }

    Ok(())
}
