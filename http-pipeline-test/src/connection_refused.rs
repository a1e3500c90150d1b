use anyhow::{bail, ensure};
use http::Method;
use http_pipeline::{PipelineBuilder, PipelineError, Request, TransportErrorKind};
use tokio::net::TcpListener;

/// Nobody listens: every attempt fails to connect and the budget runs out.
pub async fn run() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let options = crate::base_options()?;
    let max_retries = options.retry_options().max_retries;
    let pipeline = PipelineBuilder::new(options).build()?;

    let mut request = Request::new(Method::GET, format!("http://{addr}/").parse()?);
    match pipeline.send_request(&mut request).await {
        Err(PipelineError::RetriesExhausted { attempts, last }) => {
            ensure!(attempts == max_retries + 1, "{attempts} attempts");
            ensure!(
                last.transport_kind() == Some(TransportErrorKind::Connect),
                "last error was {last}"
            );
            Ok(())
        }
        Err(other) => bail!("unexpected error: {other}"),
        Ok(response) => bail!("unexpected response: {}", response.status()),
    }
}
