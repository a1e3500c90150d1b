//! The chain stage that hands a message to its transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http_pipeline_core::TransportErrorKind;

use super::Transport;
use crate::policy::{BoxFuture, Next, Policy, PolicyKind};
use crate::{Message, PipelineError};

/// Run `fut` under an optional time limit.
///
/// Expiry is a retryable [`TransportErrorKind::Timeout`].
pub(crate) async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            PipelineError::transport(
                TransportErrorKind::Timeout,
                format!("no response within {} ms", limit.as_millis()),
            )
        })?,
        None => fut.await,
    }
}

/// Terminal policy wrapping a [`Transport`].
///
/// Each call races the exchange against the message's cancellation token and
/// the network timeout, then installs the response in the message, releasing
/// the previous one.
pub(crate) struct TransportStage {
    transport: Arc<dyn Transport>,
    network_timeout: Option<Duration>,
}

impl TransportStage {
    pub(crate) fn new(transport: Arc<dyn Transport>, network_timeout: Option<Duration>) -> Self {
        Self {
            transport,
            network_timeout,
        }
    }
}

impl Policy for TransportStage {
    fn process<'a>(
        &'a self,
        message: &'a mut Message,
        _next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let token = message.cancellation().clone();
            if token.is_cancelled() {
                return Err(PipelineError::canceled("request canceled before sending"));
            }

            let exchange = with_timeout(
                self.network_timeout,
                self.transport.send(message.request_mut()),
            );
            let response = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(PipelineError::canceled("request canceled while in flight"));
                }
                result = exchange => result?,
            };

            message.set_response(response);
            Ok(())
        })
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Transport
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::Request;
    use crate::transport::{MockResponse, MockTransport};

    fn stage(transport: &MockTransport, timeout: Option<Duration>) -> Vec<Arc<dyn Policy>> {
        vec![Arc::new(TransportStage::new(
            Arc::new(transport.clone()),
            timeout,
        ))]
    }

    #[tokio::test]
    async fn test_installs_response() {
        let transport = MockTransport::new().respond(MockResponse::new(StatusCode::ACCEPTED));
        let chain = stage(&transport, None);
        let mut message = Message::new(Request::default(), CancellationToken::new());

        Next::new(&chain).run(&mut message).await.unwrap();
        assert_eq!(message.response().unwrap().status(), StatusCode::ACCEPTED);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::OK).delay(Duration::from_millis(200)));
        let chain = stage(&transport, Some(Duration::from_millis(10)));
        let mut message = Message::new(Request::default(), CancellationToken::new());

        let err = Next::new(&chain).run(&mut message).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
        assert!(err.is_retryable());
        assert!(message.response().is_none());
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_exchange() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::OK).delay(Duration::from_secs(5)));
        let chain = stage(&transport, None);
        let token = CancellationToken::new();
        let mut message = Message::new(Request::default(), token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = Next::new(&chain).run(&mut message).await.unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_canceled());
        assert!(message.response().is_none());
    }

    #[tokio::test]
    async fn test_already_canceled_skips_transport() {
        let transport = MockTransport::new().respond(MockResponse::new(StatusCode::OK));
        let chain = stage(&transport, None);
        let token = CancellationToken::new();
        token.cancel();
        let mut message = Message::new(Request::default(), token);

        let err = Next::new(&chain).run(&mut message).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(transport.call_count(), 0);
    }
}
