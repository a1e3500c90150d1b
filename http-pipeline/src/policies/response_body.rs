//! Response buffering.

use std::time::Duration;

use http_pipeline_core::{BodyError, TransportErrorKind};

use crate::policy::{BoxFuture, Next, Policy};
use crate::transport::with_timeout;
use crate::{Message, PipelineError};

/// Reads the response body into memory before the response leaves the retry
/// stage.
///
/// Placed after the retry stage, so a connection that dies mid-body is
/// reported as a retryable transport error and the attempt is repeated. The
/// read honours the network timeout and the message's cancellation token.
#[derive(Debug)]
pub struct ResponseBodyPolicy {
    network_timeout: Option<Duration>,
}

impl ResponseBodyPolicy {
    pub fn new(network_timeout: Option<Duration>) -> Self {
        Self { network_timeout }
    }

    async fn run<'a>(&'a self, message: &'a mut Message, next: Next<'a>) -> Result<(), PipelineError> {
        next.run(&mut *message).await?;

        let token = message.cancellation().clone();
        let Some(response) = message.response_mut() else {
            return Ok(());
        };
        if response.body().is_buffered() {
            return Ok(());
        }

        let read = with_timeout(self.network_timeout, async {
            response
                .body_mut()
                .buffer()
                .await
                .map(|_| ())
                .map_err(read_error)
        });
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                Err(PipelineError::canceled("request canceled while reading the response body"))
            }
            result = read => result,
        }
    }
}

fn read_error(error: BodyError) -> PipelineError {
    match error {
        BodyError::Read(message) => PipelineError::transport(TransportErrorKind::Io, message),
        other => other.into(),
    }
}

impl Policy for ResponseBodyPolicy {
    fn process<'a>(
        &'a self,
        message: &'a mut Message,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(self.run(message, next))
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use bytes::Bytes;
    use http::StatusCode;
    use http_body::Frame;
    use http_body_util::StreamBody;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::transport::{MockResponse, MockTransport, TransportStage};
    use crate::{Request, Response};

    /// Terminal stage answering with a streaming body.
    struct Streaming(Vec<Result<&'static str, &'static str>>);

    impl Policy for Streaming {
        fn process<'a>(
            &'a self,
            message: &'a mut Message,
            _next: Next<'a>,
        ) -> BoxFuture<'a, Result<(), PipelineError>> {
            Box::pin(async move {
                let frames = self.0.clone().into_iter().map(|chunk| {
                    chunk
                        .map(|data| Frame::data(Bytes::from(data)))
                        .map_err(|e| e.to_string())
                });
                let body = StreamBody::new(futures::stream::iter(frames));
                let wire = http::Response::builder().status(200).body(body).unwrap();
                message.set_response(Response::from_http(wire));
                Ok(())
            })
        }
    }

    fn message() -> Message {
        Message::new(Request::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_buffers_streaming_body() {
        let chain: Vec<Arc<dyn Policy>> = vec![
            Arc::new(ResponseBodyPolicy::new(None)),
            Arc::new(Streaming(vec![Ok("hello "), Ok("world")])),
        ];
        let mut message = message();

        Next::new(&chain).run(&mut message).await.unwrap();

        let body = message.response().unwrap().body();
        assert!(body.is_buffered());
        assert_eq!(body.bytes(), Some(&Bytes::from("hello world")));
    }

    #[tokio::test]
    async fn test_read_failure_is_retryable_io() {
        let chain: Vec<Arc<dyn Policy>> = vec![
            Arc::new(ResponseBodyPolicy::new(None)),
            Arc::new(Streaming(vec![Ok("partial"), Err("connection reset")])),
        ];

        let err = Next::new(&chain).run(&mut message()).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Io));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_buffered_body_passes_through() {
        let transport = MockTransport::new().respond(MockResponse::new(StatusCode::OK).body("ready"));
        let chain: Vec<Arc<dyn Policy>> = vec![
            Arc::new(ResponseBodyPolicy::new(Some(Duration::from_millis(50)))),
            Arc::new(TransportStage::new(Arc::new(transport), None)),
        ];
        let mut message = message();

        Next::new(&chain).run(&mut message).await.unwrap();
        assert_eq!(
            message.response().unwrap().body().bytes(),
            Some(&Bytes::from("ready"))
        );
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        struct Stalled;

        impl Policy for Stalled {
            fn process<'a>(
                &'a self,
                message: &'a mut Message,
                _next: Next<'a>,
            ) -> BoxFuture<'a, Result<(), PipelineError>> {
                Box::pin(async move {
                    let pending =
                        futures::stream::pending::<Result<Frame<Bytes>, Infallible>>();
                    let wire = http::Response::new(StreamBody::new(pending));
                    message.set_response(Response::from_http(wire));
                    Ok(())
                })
            }
        }

        let chain: Vec<Arc<dyn Policy>> = vec![
            Arc::new(ResponseBodyPolicy::new(Some(Duration::from_millis(20)))),
            Arc::new(Stalled),
        ];
        let err = Next::new(&chain).run(&mut message()).await.unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    }
}
