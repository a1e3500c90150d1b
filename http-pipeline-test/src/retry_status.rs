use anyhow::{Context, ensure};
use http::{Method, StatusCode};
use http_pipeline::{PipelineBuilder, Request};

use crate::server::{FLAKY_FAILURES, TestServer};

/// Two 503s then a 200: the caller sees only the final response.
pub async fn run() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let pipeline = PipelineBuilder::new(crate::base_options()?).build()?;

    let mut request = Request::new(Method::GET, server.url("/flaky").parse()?);
    let response = pipeline.send_request(&mut request).await?;

    ensure!(response.status() == StatusCode::OK, "status {}", response.status());
    ensure!(
        server.hits() == FLAKY_FAILURES + 1,
        "server saw {} requests",
        server.hits()
    );
    let attempt = response
        .headers()
        .get("x-attempt")
        .context("missing x-attempt header")?;
    ensure!(attempt == "3", "x-attempt was {attempt:?}");
    let body = response.body().bytes().context("body was not buffered")?;
    ensure!(body.as_ref() == b"ok", "unexpected body {body:?}");
    Ok(())
}
