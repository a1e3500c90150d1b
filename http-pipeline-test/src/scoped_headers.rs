use anyhow::{Context, ensure};
use http_pipeline::{
    HeaderPolicy, Pipeline, PipelineBuilder, PipelinePosition, RequestContext,
};
use serde_json::Value;

use crate::server::TestServer;

/// Builder, client options and request tiers all reach the wire in order,
/// and request-scoped policies apply to their own message only.
pub async fn run() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let options = crate::base_options()?
        .add_policy(HeaderPolicy::new("x-order", "client"), PipelinePosition::PerRetry);
    let pipeline = PipelineBuilder::new(options)
        .per_call_policy(HeaderPolicy::new("x-order", "builder"))
        .build()?;

    let scoped = RequestContext::new().add_policy(
        HeaderPolicy::new("x-order", "request"),
        PipelinePosition::BeforeTransport,
    );
    let first = echo(&pipeline, &server, scoped).await?;
    ensure!(
        first["order"] == serde_json::json!(["builder", "client", "request"]),
        "first request order: {}",
        first["order"]
    );
    let request_id = first["request_id"].as_str().context("missing request id")?;
    ensure!(request_id.len() == 32, "request id {request_id:?}");

    let second = echo(&pipeline, &server, RequestContext::new()).await?;
    ensure!(
        second["order"] == serde_json::json!(["builder", "client"]),
        "second request order: {}",
        second["order"]
    );
    Ok(())
}

async fn echo(
    pipeline: &Pipeline,
    server: &TestServer,
    context: RequestContext,
) -> anyhow::Result<Value> {
    let mut message = pipeline.create_message(context);
    message.request_mut().set_uri(server.url("/echo").parse()?);
    pipeline.send(&mut message).await?;

    let response = message.response().context("no response")?;
    let body = response.body().bytes().context("body was not buffered")?;
    Ok(serde_json::from_slice(body)?)
}
