//! The outcome of a rate limit decision.

use std::time::Duration;

/// A single rate limit decision.
///
/// Produced once per call and never persisted. `reset_at` is expressed in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The number of attempts allowed by the binding limit.
    pub limit: u64,
    /// Attempts left before the binding limit denies.
    pub remaining: u64,
    /// Unix time in seconds at which the binding limit frees up.
    pub reset_at: u64,
    /// Seconds to wait before retrying, present only when denied.
    pub retry_after: Option<u64>,
    /// The cost charged for the request.
    pub cost: u64,
}

impl RateLimitResult {
    /// Sentinel for `limit` and `remaining` when no limit applies.
    pub const UNLIMITED: u64 = u64::MAX;

    /// A decision that lets the request through.
    pub fn allowed(limit: u64, remaining: u64, reset_at: u64, cost: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
            cost,
        }
    }

    /// A decision that rejects the request. `retry_after` is at least one second.
    pub fn denied(limit: u64, remaining: u64, reset_at: u64, retry_after: u64, cost: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining,
            reset_at,
            retry_after: Some(retry_after.max(1)),
            cost,
        }
    }

    /// A decision for a request with no applicable limits.
    pub fn unlimited(now: u64, cost: u64) -> Self {
        Self::allowed(Self::UNLIMITED, Self::UNLIMITED, now, cost)
    }

    /// Whether no limit applied to this decision.
    pub fn is_unlimited(&self) -> bool {
        self.limit == Self::UNLIMITED
    }

    /// The retry delay as a duration.
    pub fn retry_after_duration(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs)
    }

    /// Fold another decision into this one, keeping the most restrictive outcome.
    ///
    /// The request is allowed only if both decisions allow it. The decision with the fewest remaining
    /// attempts is the binding one and provides `limit`. When anything denies, the longest wait among
    /// the denials provides `reset_at` and `retry_after`.
    pub(crate) fn fold(self, other: Self) -> Self {
        let binding = if other.remaining < self.remaining { other } else { self };

        let (reset_at, retry_after) = match (self.allowed, other.allowed) {
            (true, true) => (binding.reset_at, None),
            (false, true) => (self.reset_at, self.retry_after),
            (true, false) => (other.reset_at, other.retry_after),
            (false, false) => (
                self.reset_at.max(other.reset_at),
                self.retry_after.max(other.retry_after),
            ),
        };

        Self {
            allowed: self.allowed && other.allowed,
            limit: binding.limit,
            remaining: binding.remaining,
            reset_at,
            retry_after,
            cost: self.cost,
        }
    }
}
