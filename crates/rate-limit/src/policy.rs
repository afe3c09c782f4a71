//! What callers do when the storage backend fails.

use config::FailureMode;

use crate::{
    clock::{Clock, SystemClock},
    error::RateLimitError,
    result::RateLimitResult,
};

/// Turns storage failures into decisions according to the configured [`FailureMode`].
///
/// The manager never applies a failure mode itself, storage errors reach the caller untouched and the
/// caller picks the trade-off between availability and protection.
pub trait FailurePolicy {
    /// Replace a storage error with an allowed (open) or denied (closed) decision for a request of
    /// `cost` units.
    ///
    /// Configuration errors are returned unchanged.
    fn apply(
        &self,
        outcome: Result<RateLimitResult, RateLimitError>,
        cost: u32,
    ) -> Result<RateLimitResult, RateLimitError>;
}

impl FailurePolicy for FailureMode {
    fn apply(
        &self,
        outcome: Result<RateLimitResult, RateLimitError>,
        cost: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        let error = match outcome {
            Err(RateLimitError::Storage(error)) => error,
            other => return other,
        };

        let now = SystemClock.now_secs();
        let cost = u64::from(cost);

        match self {
            FailureMode::Open => {
                log::warn!("Rate limit storage failed, allowing the request: {error}");
                Ok(RateLimitResult::unlimited(now, cost))
            }
            FailureMode::Closed => {
                log::error!("Rate limit storage failed, rejecting the request: {error}");
                Ok(RateLimitResult::denied(0, 0, now.saturating_add(1), 1, cost))
            }
        }
    }
}
