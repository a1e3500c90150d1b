//! Retry configuration and backoff.
//!
//! - [`RetryOptions`]: Attempt budget, backoff curve, and the retryable set
//! - [`ExponentialBackoff`]: Per-send iterator of backoff delays with jitter
//! - [`RetryClassifier`]: Decides which responses and errors are retryable
//!
//! # Example
//!
//! ```
//! use http_pipeline::{PipelineOptions, RetryMode, RetryOptions};
//! use std::time::Duration;
//!
//! let retry = RetryOptions::new()
//!     .max_retries(5)
//!     .base_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .mode(RetryMode::Exponential)
//!     .retryable_status_codes([429, 503]);
//!
//! let options = PipelineOptions::new().retry(retry);
//! ```

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use crate::{PipelineError, Response};

/// Default retry configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default maximum number of retries (not counting the first attempt).
    pub const MAX_RETRIES: u32 = 3;

    /// Default delay before the first retry.
    pub const BASE_DELAY: Duration = Duration::from_millis(800);

    /// Default maximum delay between attempts.
    pub const MAX_DELAY: Duration = Duration::from_secs(60);

    /// Default multiplier for exponential backoff.
    pub const MULTIPLIER: f64 = 2.0;

    /// Default jitter factor (0.2 means +/- 20%).
    pub const JITTER: f64 = 0.2;

    /// Default retryable status codes: request timeout, too many requests,
    /// and the transient server errors.
    pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];
}

/// Shape of the backoff curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// `base_delay * multiplier^(retry - 1)`, capped at `max_delay`.
    #[default]
    Exponential,
    /// `base_delay` before every retry.
    Fixed,
}

/// Decides whether an attempt's outcome is worth another attempt.
pub trait RetryClassifier: Send + Sync {
    /// Returns whether a completed response should be retried.
    fn is_retryable_response(&self, response: &Response) -> bool;

    /// Returns whether a failed attempt should be retried.
    ///
    /// The default retries transient transport failures only.
    fn is_retryable_error(&self, error: &PipelineError) -> bool {
        error.is_retryable()
    }
}

/// Classifies responses by status code.
#[derive(Clone, Debug)]
pub struct StatusCodeClassifier {
    codes: Vec<StatusCode>,
}

impl StatusCodeClassifier {
    /// Create a classifier from raw status codes. Invalid codes are ignored.
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            codes: codes
                .into_iter()
                .filter_map(|code| StatusCode::from_u16(code).ok())
                .collect(),
        }
    }

    pub fn codes(&self) -> &[StatusCode] {
        &self.codes
    }
}

impl Default for StatusCodeClassifier {
    fn default() -> Self {
        Self::new(defaults::RETRYABLE_STATUS_CODES)
    }
}

impl RetryClassifier for StatusCodeClassifier {
    fn is_retryable_response(&self, response: &Response) -> bool {
        self.codes.contains(&response.status())
    }
}

/// A custom delay function, called with the 1-based retry number.
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Configuration for the retry stage.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `base_delay`: 800 ms
/// - `max_delay`: 60 seconds
/// - `multiplier`: 2.0
/// - `jitter`: 0.2 (20%)
/// - `mode`: exponential
/// - retryable statuses: 408, 429, 500, 502, 503, 504
#[derive(Clone)]
pub struct RetryOptions {
    /// Maximum number of retries (not counting the first attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Maximum delay between attempts, also the cap for server-supplied
    /// `Retry-After` values.
    pub max_delay: Duration,

    /// Multiplier for exponential backoff. Must be >= 1.0.
    pub multiplier: f64,

    /// Jitter factor between 0.0 and 1.0. A value of 0.2 keeps each delay
    /// within +/- 20% of the computed delay.
    pub jitter: f64,

    pub mode: RetryMode,

    classifier: Arc<dyn RetryClassifier>,
    delay_fn: Option<DelayFn>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay: defaults::BASE_DELAY,
            max_delay: defaults::MAX_DELAY,
            multiplier: defaults::MULTIPLIER,
            jitter: defaults::JITTER,
            mode: RetryMode::default(),
            classifier: Arc::new(StatusCodeClassifier::default()),
            delay_fn: None,
        }
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that never retry.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier. Checked by [`validate`](Self::validate).
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter factor. Checked by [`validate`](Self::validate).
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn mode(mut self, mode: RetryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the retryable status set.
    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.classifier = Arc::new(StatusCodeClassifier::new(codes));
        self
    }

    /// Replace the outcome classifier.
    pub fn classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Compute delays with a custom function instead of the built-in curve.
    ///
    /// The result is still capped at `max_delay`.
    pub fn delay_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.delay_fn = Some(Arc::new(f));
        self
    }

    pub fn retry_classifier(&self) -> &dyn RetryClassifier {
        self.classifier.as_ref()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.base_delay > self.max_delay {
            return Err(PipelineError::configuration(
                "retry base_delay must not exceed max_delay",
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(PipelineError::configuration(
                "retry multiplier must be >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PipelineError::configuration(
                "retry jitter must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }

    /// Create the backoff state for one send.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.clone())
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("mode", &self.mode)
            .field("delay_fn", &self.delay_fn.is_some())
            .finish_non_exhaustive()
    }
}

/// Backoff iterator with jitter.
///
/// The exponential sequence is `base * multiplier^retry`, each value moved by
/// up to +/- `jitter` and clamped to `max_delay`.
///
/// # Example
///
/// ```
/// use http_pipeline::RetryOptions;
/// use std::time::Duration;
///
/// let options = RetryOptions::new()
///     .base_delay(Duration::from_millis(100))
///     .jitter(0.0);
/// let mut backoff = options.backoff();
///
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
/// assert_eq!(backoff.attempts(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    options: RetryOptions,
    /// Current delay without jitter, stored as f64 to avoid rounding errors.
    current_delay_secs: f64,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(options: RetryOptions) -> Self {
        let current_delay_secs = options.base_delay.as_secs_f64();
        Self {
            options,
            current_delay_secs,
            attempts: 0,
        }
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Check if more retries are allowed.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.options.max_retries
    }

    /// Get the next delay and advance the sequence.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        let max = self.options.max_delay.as_secs_f64();

        if let Some(delay_fn) = &self.options.delay_fn {
            return delay_fn(self.attempts).min(self.options.max_delay);
        }

        let delay = match self.options.mode {
            RetryMode::Exponential => self.current_delay_secs,
            RetryMode::Fixed => self.options.base_delay.as_secs_f64(),
        };

        let jittered = if self.options.jitter > 0.0 {
            let jitter_range = self.options.jitter * 2.0;
            let random_factor = rand::random::<f64>() * jitter_range - self.options.jitter;
            delay * (1.0 + random_factor)
        } else {
            delay
        };

        self.current_delay_secs = (self.current_delay_secs * self.options.multiplier).min(max);

        Duration::from_secs_f64(jittered.min(max).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_options_default() {
        let options = RetryOptions::default();
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.base_delay, Duration::from_millis(800));
        assert_eq!(options.max_delay, Duration::from_secs(60));
        assert!((options.multiplier - 2.0).abs() < f64::EPSILON);
        assert!((options.jitter - 0.2).abs() < f64::EPSILON);
        assert_eq!(options.mode, RetryMode::Exponential);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_default_classifier_statuses() {
        let options = RetryOptions::default();
        let classifier = options.retry_classifier();
        for code in [408, 429, 500, 502, 503, 504] {
            let response = Response::new(StatusCode::from_u16(code).unwrap());
            assert!(classifier.is_retryable_response(&response), "{code}");
        }
        for code in [200, 400, 404, 501] {
            let response = Response::new(StatusCode::from_u16(code).unwrap());
            assert!(!classifier.is_retryable_response(&response), "{code}");
        }
    }

    #[test]
    fn test_custom_status_codes() {
        let options = RetryOptions::new().retryable_status_codes([418]);
        let classifier = options.retry_classifier();
        assert!(classifier.is_retryable_response(&Response::new(StatusCode::IM_A_TEAPOT)));
        assert!(!classifier.is_retryable_response(&Response::new(
            StatusCode::SERVICE_UNAVAILABLE
        )));
    }

    #[test]
    fn test_validate() {
        let invalid = RetryOptions::new()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1));
        assert!(matches!(
            invalid.validate(),
            Err(PipelineError::Configuration(_))
        ));

        assert!(RetryOptions::new().multiplier(0.5).validate().is_err());
        assert!(RetryOptions::new().multiplier(f64::NAN).validate().is_err());
        assert!(RetryOptions::new().jitter(1.5).validate().is_err());
    }

    #[test]
    fn test_exponential_backoff_no_jitter() {
        let options = RetryOptions::new()
            .base_delay(Duration::from_secs(1))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(100))
            .jitter(0.0);
        let mut backoff = options.backoff();

        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.can_retry());
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert!(!backoff.can_retry());
    }

    #[test]
    fn test_backoff_max_delay_clamping() {
        let options = RetryOptions::new()
            .base_delay(Duration::from_secs(10))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(30))
            .jitter(0.0);
        let mut backoff = options.backoff();

        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_with_jitter_stays_in_range() {
        let options = RetryOptions::new()
            .base_delay(Duration::from_secs(1))
            .jitter(0.5);

        for _ in 0..50 {
            let delay = options.backoff().next_delay();
            assert!(delay >= Duration::from_millis(500), "{delay:?}");
            assert!(delay <= Duration::from_millis(1500), "{delay:?}");
        }
    }

    #[test]
    fn test_fixed_mode() {
        let options = RetryOptions::new()
            .mode(RetryMode::Fixed)
            .base_delay(Duration::from_millis(50))
            .jitter(0.0);
        let mut backoff = options.backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_delay_fn_is_capped() {
        let options = RetryOptions::new()
            .max_delay(Duration::from_secs(2))
            .delay_fn(|retry| Duration::from_secs(u64::from(retry)));
        let mut backoff = options.backoff();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }
}
