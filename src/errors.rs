//! Error taxonomy for the aggregation and valuation core

use thiserror::Error;

/// Errors surfaced by a refresh cycle and the valuation engine.
///
/// `Transport` and `DataProvider` abort the current cycle and are retryable;
/// the stores are left exactly as they were before the cycle started.
/// `MalformedEvent` is per-event: the event is dropped and counted, the cycle
/// continues. `ComputationInvariant` is fatal to the cycle and never clamped
/// away.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Data provider error: {0}")]
    DataProvider(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Computation invariant violated: {0}")]
    ComputationInvariant(String),

    #[error("Refresh cycle cancelled")]
    Cancelled,
}

impl CoreError {
    /// Whether retrying the whole cycle can be expected to succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transport(_) | CoreError::DataProvider(_))
    }
}
