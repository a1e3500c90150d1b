use std::time::Duration;

use anyhow::ensure;
use http::{Method, StatusCode};
use http_pipeline::{PipelineBuilder, Request};

use crate::server::TestServer;

/// The first attempt stalls past the network timeout; the retry succeeds.
pub async fn run() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let options = crate::base_options()?.network_timeout(Duration::from_millis(150));
    let pipeline = PipelineBuilder::new(options).build()?;

    let mut request = Request::new(Method::GET, server.url("/slow-once").parse()?);
    let response = pipeline.send_request(&mut request).await?;

    ensure!(response.status() == StatusCode::OK, "status {}", response.status());
    ensure!(server.hits() == 2, "server saw {} requests", server.hits());
    Ok(())
}
