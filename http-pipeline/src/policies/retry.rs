//! The retry stage.
//!
//! [`RetryPolicy`] re-runs everything downstream of itself (per-retry
//! policies, before-transport policies, transport) until an attempt is not
//! retryable or the budget is spent.
//!
//! Per attempt `n`:
//!
//! 1. Stop with `Canceled` if the message's token fired.
//! 2. For `n > 1`: rewind the request body (failing closed for a consumed
//!    one-shot body), then release the previous response.
//! 3. Record `retry_attempt` and `retry_elapsed` in the property bag.
//! 4. Run the downstream segment.
//! 5. Classify: a non-retryable outcome is returned as is; a retryable one
//!    waits out the backoff (or the server's `Retry-After`) and loops, unless
//!    the budget is spent.
//!
//! When the budget runs out on a retryable *status*, the last response stays
//! in the message and the send succeeds. When it runs out on an error, the
//! error is wrapped in [`PipelineError::RetriesExhausted`].

use std::time::{Duration, Instant, SystemTime};

use http::HeaderMap;
#[cfg(feature = "tracing")]
use http_pipeline_core::ErrorKind;

use crate::config::RetryOptions;
use crate::message::keys;
use crate::policy::{BoxFuture, Next, Policy, PolicyKind};
use crate::{Message, PipelineError};

/// Headers carrying a server-requested delay in milliseconds.
const RETRY_AFTER_MS_HEADERS: [&str; 2] = ["retry-after-ms", "x-ms-retry-after-ms"];

/// Parse a server-requested delay from response headers.
///
/// Checks `retry-after-ms` and `x-ms-retry-after-ms` (milliseconds), then
/// `Retry-After` (delta-seconds or an HTTP-date). A date in the past means
/// no delay. Values too large for a [`Duration`] saturate.
///
/// # Example
///
/// ```
/// use http::HeaderMap;
/// use http_pipeline::retry_after;
/// use std::time::Duration;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("retry-after", "2".parse().unwrap());
/// assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
/// ```
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    retry_after_at(headers, SystemTime::now())
}

pub(crate) fn retry_after_at(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    for name in RETRY_AFTER_MS_HEADERS {
        if let Some(raw) = header_str(headers, name) {
            if let Ok(ms) = raw.parse::<u64>() {
                return Some(Duration::from_millis(ms));
            }
            if let Some(delay) = fractional(raw, 1000.0) {
                return Some(delay);
            }
        }
    }

    let raw = header_str(headers, http::header::RETRY_AFTER.as_str())?;
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    if let Some(delay) = fractional(raw, 1.0) {
        return Some(delay);
    }

    let date = httpdate::parse_http_date(raw).ok()?;
    Some(date.duration_since(now).unwrap_or(Duration::ZERO))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    Some(headers.get(name)?.to_str().ok()?.trim())
}

/// Non-integer delays such as `1.5`. Negative or non-finite values are
/// rejected; oversized ones saturate.
fn fractional(raw: &str, per_second: f64) -> Option<Duration> {
    let value: f64 = raw.parse().ok()?;
    if !(value.is_finite() && value >= 0.0) {
        return None;
    }
    Some(Duration::try_from_secs_f64(value / per_second).unwrap_or(Duration::MAX))
}

/// Kind of a retryable outcome: a response in the retryable set, or the
/// error's own kind.
#[cfg(feature = "tracing")]
fn outcome_kind(result: &Result<(), PipelineError>) -> ErrorKind {
    result
        .as_ref()
        .err()
        .map_or(ErrorKind::RetryableStatus, PipelineError::kind)
}

/// Retries the downstream chain on retryable outcomes.
///
/// The pipeline inserts exactly one `RetryPolicy`, built from
/// [`RetryOptions`]. Supplying another one in a policy bucket is a
/// configuration error.
#[derive(Debug)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    async fn run<'a>(&'a self, message: &'a mut Message, next: Next<'a>) -> Result<(), PipelineError> {
        let started = Instant::now();
        let mut backoff = self.options.backoff();
        let classifier = self.options.retry_classifier();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if message.is_canceled() {
                return Err(PipelineError::canceled("request canceled before attempt"));
            }
            if attempt > 1 {
                message.request_mut().body_mut().rewind()?;
                message.release_response();
            }
            message.properties_mut().insert(keys::RETRY_ATTEMPT, attempt);
            message
                .properties_mut()
                .insert(keys::RETRY_ELAPSED, started.elapsed());

            let result = next.fork().run(&mut *message).await;

            let retryable = match &result {
                Ok(()) => message
                    .response()
                    .is_some_and(|response| classifier.is_retryable_response(response)),
                Err(error) if error.is_canceled() => false,
                Err(error) => classifier.is_retryable_error(error),
            };
            if !retryable {
                return result;
            }

            if !backoff.can_retry() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempts = attempt,
                    kind = %outcome_kind(&result),
                    status = message.response().map(|r| r.status().as_u16()),
                    error = result.as_ref().err().map(tracing::field::display),
                    "retry budget exhausted"
                );
                return result.map_err(|last| PipelineError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(last),
                });
            }

            let computed = backoff.next_delay();
            let delay = message
                .response()
                .and_then(|response| retry_after(response.headers()))
                .map(|requested| requested.min(self.options.max_delay))
                .unwrap_or(computed);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt,
                kind = %outcome_kind(&result),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                status = message.response().map(|r| r.status().as_u16()),
                error = result.as_ref().err().map(tracing::field::display),
                "retrying after retryable outcome"
            );

            let token = message.cancellation().clone();
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(PipelineError::canceled("request canceled during retry backoff"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Policy for RetryPolicy {
    fn process<'a>(
        &'a self,
        message: &'a mut Message,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(self.run(message, next))
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Retry
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::StatusCode;
    use http_pipeline_core::{BodyError, TransportErrorKind};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::transport::{MockResponse, MockTransport, TransportStage};
    use crate::{Request, RequestBody};

    fn fast() -> RetryOptions {
        RetryOptions::new()
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(20))
            .jitter(0.0)
    }

    fn chain(options: RetryOptions, transport: &MockTransport) -> Vec<Arc<dyn Policy>> {
        vec![
            Arc::new(RetryPolicy::new(options)),
            Arc::new(TransportStage::new(Arc::new(transport.clone()), None)),
        ]
    }

    async fn send(chain: &[Arc<dyn Policy>], message: &mut Message) -> Result<(), PipelineError> {
        Next::new(chain).run(message).await
    }

    fn message() -> Message {
        Message::new(Request::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_budget_of_two_surfaces_third_response() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::SERVICE_UNAVAILABLE).header("x-attempt", "1"))
            .respond(MockResponse::new(StatusCode::SERVICE_UNAVAILABLE).header("x-attempt", "2"))
            .respond(MockResponse::new(StatusCode::SERVICE_UNAVAILABLE).header("x-attempt", "3"))
            .respond(MockResponse::new(StatusCode::OK).header("x-attempt", "4"));
        let chain = chain(fast().max_retries(2), &transport);
        let mut message = message();

        send(&chain, &mut message).await.unwrap();

        assert_eq!(transport.call_count(), 3);
        let response = message.response().unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["x-attempt"], "3");
        assert_eq!(message.properties().get::<u32>(keys::RETRY_ATTEMPT), Some(&3));
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::REQUEST_TIMEOUT))
            .respond(MockResponse::new(StatusCode::OK));
        let chain = chain(fast(), &transport);
        let mut message = message();

        send(&chain, &mut message).await.unwrap();
        assert_eq!(transport.call_count(), 2);
        assert_eq!(message.response().unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_non_retryable_status_returns_immediately() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::NOT_FOUND))
            .respond(MockResponse::new(StatusCode::OK));
        let chain = chain(fast(), &transport);
        let mut message = message();

        send(&chain, &mut message).await.unwrap();
        assert_eq!(transport.call_count(), 1);
        assert_eq!(message.response().unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_superseded_responses_are_released() {
        let first = MockResponse::new(StatusCode::SERVICE_UNAVAILABLE);
        let second = MockResponse::new(StatusCode::OK);
        let (first_probe, second_probe) = (first.probe(), second.probe());
        let transport = MockTransport::new().respond(first).respond(second);
        let chain = chain(fast(), &transport);
        let mut message = message();

        send(&chain, &mut message).await.unwrap();
        assert!(first_probe.is_released());
        assert!(!second_probe.is_released());
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_budget() {
        let refused = || PipelineError::transport(TransportErrorKind::Connect, "refused");
        let transport = MockTransport::new()
            .fail(refused())
            .fail(refused())
            .fail(refused());
        let chain = chain(fast().max_retries(2), &transport);

        let err = send(&chain, &mut message()).await.unwrap_err();
        assert_eq!(transport.call_count(), 3);
        match err {
            PipelineError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.transport_kind(), Some(TransportErrorKind::Connect));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_wrapped() {
        let transport = MockTransport::new().fail(PipelineError::policy("denied"));
        let chain = chain(fast(), &transport);

        let err = send(&chain, &mut message()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Policy(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_attempts() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::SERVICE_UNAVAILABLE))
            .respond(MockResponse::new(StatusCode::OK));
        let options = fast()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(5));
        let chain = chain(options, &transport);
        let token = CancellationToken::new();
        let mut message = Message::new(Request::default(), token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = send(&chain, &mut message).await.unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_canceled());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_consumed_stream_body_fails_closed() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::SERVICE_UNAVAILABLE))
            .respond(MockResponse::new(StatusCode::OK));
        let chain = chain(fast(), &transport);
        let mut request = Request::default();
        request.set_body(RequestBody::from_stream(futures::stream::iter(vec![Ok(
            bytes::Bytes::from("once"),
        )])));
        let mut message = Message::new(request, CancellationToken::new());

        let err = send(&chain, &mut message).await.unwrap_err();
        assert!(matches!(err, PipelineError::Body(BodyError::NotReplayable)));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.requests()[0].body, "once");
        // The last response is still available to the caller
        assert_eq!(
            message.response().unwrap().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff() {
        let transport = MockTransport::new()
            .respond(MockResponse::new(StatusCode::TOO_MANY_REQUESTS).header("retry-after-ms", "30"))
            .respond(MockResponse::new(StatusCode::OK));
        let chain = chain(fast().max_delay(Duration::from_secs(1)), &transport);
        let mut message = message();

        let started = Instant::now();
        send(&chain, &mut message).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", "3".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert("x-ms-retry-after-ms", "250".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(250)));

        headers.insert("retry-after-ms", "100".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(100)));

        let mut fractional = HeaderMap::new();
        fractional.insert("retry-after", "1.5".parse().unwrap());
        assert_eq!(retry_after(&fractional), Some(Duration::from_millis(1500)));

        let mut negative = HeaderMap::new();
        negative.insert("retry-after", "-1".parse().unwrap());
        assert_eq!(retry_after(&negative), None);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn test_outcome_kind() {
        assert_eq!(outcome_kind(&Ok(())), ErrorKind::RetryableStatus);
        let timeout = PipelineError::transport(TransportErrorKind::Timeout, "slow");
        assert_eq!(outcome_kind(&Err(timeout)), ErrorKind::TransientTransport);
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = httpdate::parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();

        let mut future = HeaderMap::new();
        future.insert("retry-after", "Sun, 06 Nov 1994 08:50:07 GMT".parse().unwrap());
        assert_eq!(retry_after_at(&future, now), Some(Duration::from_secs(30)));

        let mut past = HeaderMap::new();
        past.insert("retry-after", "Fri, 31 Dec 1993 23:59:59 GMT".parse().unwrap());
        assert_eq!(retry_after_at(&past, now), Some(Duration::ZERO));

        let mut garbage = HeaderMap::new();
        garbage.insert("retry-after", "soon".parse().unwrap());
        assert_eq!(retry_after_at(&garbage, now), None);
    }

    #[test]
    fn test_oversized_retry_after_saturates() {
        let mut huge_seconds = HeaderMap::new();
        huge_seconds.insert("retry-after", "99999999999999999999".parse().unwrap());
        assert_eq!(retry_after(&huge_seconds), Some(Duration::MAX));

        let mut huge_float = HeaderMap::new();
        huge_float.insert("retry-after", "1e20".parse().unwrap());
        assert_eq!(retry_after(&huge_float), Some(Duration::MAX));

        let mut huge_ms = HeaderMap::new();
        huge_ms.insert("retry-after-ms", "1e30".parse().unwrap());
        assert_eq!(retry_after(&huge_ms), Some(Duration::MAX));
    }

    #[tokio::test]
    async fn test_oversized_retry_after_is_capped_at_max_delay() {
        let transport = MockTransport::new()
            .respond(
                MockResponse::new(StatusCode::SERVICE_UNAVAILABLE)
                    .header("retry-after", "99999999999999999999"),
            )
            .respond(MockResponse::new(StatusCode::OK));
        let chain = chain(fast().max_delay(Duration::from_millis(10)), &transport);
        let mut message = message();

        send(&chain, &mut message).await.unwrap();
        assert_eq!(transport.call_count(), 2);
        assert_eq!(message.response().unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_past_retry_after_date_retries_immediately() {
        let transport = MockTransport::new()
            .respond(
                MockResponse::new(StatusCode::SERVICE_UNAVAILABLE)
                    .header("retry-after", "Fri, 31 Dec 1999 23:59:59 GMT"),
            )
            .respond(MockResponse::new(StatusCode::OK));
        let options = fast()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(5));
        let chain = chain(options, &transport);
        let mut message = message();

        let started = Instant::now();
        send(&chain, &mut message).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(transport.call_count(), 2);
    }
}
