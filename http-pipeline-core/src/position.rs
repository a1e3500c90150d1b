//! Policy insertion positions.

use serde::Serialize;

/// Where a policy is inserted into the effective chain.
///
/// The structural order is fixed:
///
/// ```text
/// [PerCall ...] -> retry -> [PerRetry ...] -> [BeforeTransport ...] -> transport
/// ```
///
/// `PerCall` policies run once per logical operation. `PerRetry` and
/// `BeforeTransport` policies sit downstream of the retry policy and run once
/// per attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePosition {
    PerCall,
    PerRetry,
    BeforeTransport,
}

impl PipelinePosition {
    /// All positions in chain order.
    pub const ALL: [PipelinePosition; 3] = [
        PipelinePosition::PerCall,
        PipelinePosition::PerRetry,
        PipelinePosition::BeforeTransport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePosition::PerCall => "per_call",
            PipelinePosition::PerRetry => "per_retry",
            PipelinePosition::BeforeTransport => "before_transport",
        }
    }
}

impl std::fmt::Display for PipelinePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
