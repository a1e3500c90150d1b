//! Built-in policies placed by the pipeline.
//!
//! - [`RetryPolicy`]: The retry stage that replays the downstream chain
//! - [`RequestIdPolicy`]: Per-call client request id
//! - [`ResponseBodyPolicy`]: Buffers response bodies inside the retry loop
//! - [`LoggingPolicy`]: Per-attempt request/response logging (`tracing` feature)

#[cfg(feature = "tracing")]
mod logging;
mod request_id;
mod response_body;
mod retry;

#[cfg(feature = "tracing")]
pub use logging::{LoggingPolicy, redact_headers};
pub use request_id::RequestIdPolicy;
pub use response_body::ResponseBodyPolicy;
pub use retry::{RetryPolicy, retry_after};
