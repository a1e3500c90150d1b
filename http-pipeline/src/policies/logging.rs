//! Request and response logging through `tracing`.
//!
//! Header values are redacted unless their name is on the allow list.

use std::time::Instant;

use http::HeaderMap;
use http::header::HeaderName;

use crate::config::LoggingOptions;
use crate::message::keys;
use crate::policy::{BoxFuture, Next, Policy};
use crate::{Message, PipelineError};

const REDACTED: &str = "REDACTED";

/// Logs every attempt: the request on the way out, the status and elapsed
/// time on the way back, and the error if the attempt failed.
#[derive(Clone, Debug)]
pub struct LoggingPolicy {
    allowed_headers: Vec<HeaderName>,
}

impl LoggingPolicy {
    pub fn new(options: &LoggingOptions) -> Self {
        Self {
            allowed_headers: options.allowed_header_names.clone(),
        }
    }

    async fn run<'a>(&'a self, message: &'a mut Message, next: Next<'a>) -> Result<(), PipelineError> {
        let attempt = message
            .properties()
            .get::<u32>(keys::RETRY_ATTEMPT)
            .copied()
            .unwrap_or(1);
        tracing::debug!(
            method = %message.request().method(),
            url = %message.request().uri(),
            attempt,
            headers = %redact_headers(message.request().headers(), &self.allowed_headers),
            "sending request"
        );

        let started = Instant::now();
        let result = next.run(&mut *message).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match (&result, message.response()) {
            (Ok(()), Some(response)) => tracing::debug!(
                status = response.status().as_u16(),
                attempt,
                elapsed_ms,
                headers = %redact_headers(response.headers(), &self.allowed_headers),
                "received response"
            ),
            (Ok(()), None) => tracing::debug!(attempt, elapsed_ms, "chain completed without a response"),
            (Err(error), _) => tracing::warn!(
                attempt,
                elapsed_ms,
                kind = %error.kind(),
                error = %error,
                "request attempt failed"
            ),
        }
        result
    }
}

/// Render headers as `name: value` pairs, masking values not on the allow
/// list.
pub fn redact_headers(headers: &HeaderMap, allowed: &[HeaderName]) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if allowed.contains(name) {
                value.to_str().unwrap_or(REDACTED)
            } else {
                REDACTED
            };
            format!("{name}: {value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl Policy for LoggingPolicy {
    fn process<'a>(
        &'a self,
        message: &'a mut Message,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(self.run(message, next))
    }
}
