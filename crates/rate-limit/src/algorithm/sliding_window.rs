//! Log-based sliding window over a sorted set of request timestamps.

use std::sync::Arc;

use super::{Limiter, lock::KeyLocks, retry_after};
use crate::{
    clock::Clock,
    result::RateLimitResult,
    storage::{RateLimitStorage, ScoreBound, StorageError},
};

/// Keeps a log of request timestamps in a sorted set and counts the ones inside the rolling window.
///
/// Accounting is exact, at the price of one set member per consumed unit. Each attempt prunes, counts
/// and inserts under a per-key lock, so concurrent attempts in this process never overshoot the limit.
pub struct SlidingWindow<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl<S> SlidingWindow<S> {
    /// Create a limiter over the given storage.
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            locks: KeyLocks::new(),
        }
    }
}

impl<S: RateLimitStorage> SlidingWindow<S> {
    /// Drop log entries that fell out of the window and count the rest.
    async fn prune_and_count(&self, window_key: &str, now_ms: u64, window_seconds: u64) -> Result<u64, StorageError> {
        let cutoff = now_ms.saturating_sub(window_seconds.saturating_mul(1000));

        self.storage
            .zremrangebyscore(window_key, ScoreBound::NegInfinity, ScoreBound::Inclusive(cutoff as f64))
            .await?;

        self.storage.zcard(window_key).await
    }

    /// When the oldest logged request leaves the window, in unix seconds.
    async fn reset_at(&self, window_key: &str, now_ms: u64, window_seconds: u64) -> Result<u64, StorageError> {
        let oldest = self.storage.zrange(window_key, 0, 0).await?;

        let oldest_ms = oldest
            .first()
            .and_then(|member| member.split(':').next())
            .and_then(|timestamp| timestamp.parse::<u64>().ok())
            .unwrap_or(now_ms);

        Ok(oldest_ms.saturating_add(window_seconds.saturating_mul(1000)).div_ceil(1000))
    }

    fn decide(
        &self,
        max_attempts: u32,
        remaining: u64,
        reset_at: u64,
        allowed: bool,
        cost: u32,
    ) -> RateLimitResult {
        let limit = u64::from(max_attempts);

        if allowed {
            RateLimitResult::allowed(limit, remaining, reset_at, u64::from(cost))
        } else {
            let now = self.clock.now_secs();
            RateLimitResult::denied(limit, remaining, reset_at, retry_after(reset_at, now), u64::from(cost))
        }
    }
}

impl<S: RateLimitStorage> Limiter for SlidingWindow<S> {
    async fn attempt(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        let window_key = format!("{key}:sliding");
        let _guard = self.locks.lock(&window_key).await;

        let now_ms = self.clock.now_millis();
        let current = self.prune_and_count(&window_key, now_ms, window_seconds).await?;

        let limit = u64::from(max_attempts);
        let allowed = current + u64::from(cost) <= limit;

        let remaining = if allowed {
            let members: Vec<(String, f64)> = (0..cost)
                .map(|_| (format!("{now_ms}:{:016x}", rand::random::<u64>()), now_ms as f64))
                .collect();

            self.storage.zadd(&window_key, &members).await?;
            self.storage.expire(&window_key, window_seconds).await?;

            limit - (current + u64::from(cost))
        } else {
            limit.saturating_sub(current)
        };

        let reset_at = self.reset_at(&window_key, now_ms, window_seconds).await?;

        Ok(self.decide(max_attempts, remaining, reset_at, allowed, cost))
    }

    async fn check(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        let window_key = format!("{key}:sliding");
        let _guard = self.locks.lock(&window_key).await;

        let now_ms = self.clock.now_millis();
        let current = self.prune_and_count(&window_key, now_ms, window_seconds).await?;

        let limit = u64::from(max_attempts);
        let allowed = current + u64::from(cost) <= limit;
        let reset_at = self.reset_at(&window_key, now_ms, window_seconds).await?;

        Ok(self.decide(max_attempts, limit.saturating_sub(current), reset_at, allowed, cost))
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        self.storage.delete(&format!("{key}:sliding")).await?;

        Ok(())
    }
}
