use std::time::{Duration, Instant};

use anyhow::{bail, ensure};
use http_pipeline::{PipelineBuilder, RequestContext};
use tokio_util::sync::CancellationToken;

use crate::server::TestServer;

/// Canceling the token aborts the in-flight call and stops retrying.
pub async fn run() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let pipeline = PipelineBuilder::new(crate::base_options()?).build()?;

    let token = CancellationToken::new();
    let mut message = pipeline.create_message(RequestContext::new().cancellation(token.clone()));
    message.request_mut().set_uri(server.url("/hang").parse()?);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    let started = Instant::now();
    let result = pipeline.send(&mut message).await;
    canceller.await?;

    match result {
        Err(e) if e.is_canceled() => {}
        Err(e) => bail!("expected cancellation, got {e}"),
        Ok(()) => bail!("request completed despite cancellation"),
    }
    ensure!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation took {:?}",
        started.elapsed()
    );
    ensure!(server.hits() == 1, "server saw {} requests", server.hits());
    Ok(())
}
