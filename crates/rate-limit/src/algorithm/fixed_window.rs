//! Fixed window counting with one expiring counter per window.

use std::sync::Arc;

use dashmap::DashSet;

use super::{Limiter, retry_after};
use crate::{
    clock::Clock,
    result::RateLimitResult,
    storage::{RateLimitStorage, StorageError},
};

/// Counts requests in consecutive windows aligned to multiples of the window length.
///
/// A burst at the end of one window followed by a burst at the start of the next is allowed, so the
/// short term rate can reach twice the limit.
pub struct FixedWindow<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    /// Window lengths seen so far, needed to find the current window keys on reset.
    windows: DashSet<u64>,
}

impl<S> FixedWindow<S> {
    /// Create a limiter over the given storage.
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            windows: DashSet::new(),
        }
    }

    /// The counter key of the window containing `now`, and the unix time the next window starts.
    fn window(&self, key: &str, window_seconds: u64) -> (String, u64, u64) {
        let window_seconds = window_seconds.max(1);
        self.windows.insert(window_seconds);

        let now = self.clock.now_secs();
        let bucket = now / window_seconds;

        (format!("{key}:fixed:{bucket}"), (bucket + 1) * window_seconds, now)
    }
}

fn decide(max_attempts: u32, consumed: u64, reset_at: u64, now: u64, allowed: bool, cost: u32) -> RateLimitResult {
    let limit = u64::from(max_attempts);
    let remaining = limit.saturating_sub(consumed);

    if allowed {
        RateLimitResult::allowed(limit, remaining, reset_at, u64::from(cost))
    } else {
        RateLimitResult::denied(limit, remaining, reset_at, retry_after(reset_at, now), u64::from(cost))
    }
}

impl<S: RateLimitStorage> Limiter for FixedWindow<S> {
    async fn attempt(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        let (window_key, reset_at, now) = self.window(key, window_seconds);

        let current = self.storage.increment(&window_key, i64::from(cost)).await?;

        // Only the call that created the counter sets its expiry. A missed expiry leaks one stale
        // key at most, the next window uses a new key anyway.
        if current == i64::from(cost)
            && let Err(e) = self.storage.expire(&window_key, window_seconds.max(1)).await
        {
            log::warn!("Failed to set expiry on rate limit window '{window_key}': {e}");
        }

        let consumed = current.max(0) as u64;
        let allowed = consumed <= u64::from(max_attempts);

        Ok(decide(max_attempts, consumed, reset_at, now, allowed, cost))
    }

    async fn check(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        let (window_key, reset_at, now) = self.window(key, window_seconds);

        let consumed = match self.storage.get(&window_key).await? {
            Some(value) => value.parse::<i64>().unwrap_or_else(|_| {
                log::warn!("Rate limit window '{window_key}' holds a non-numeric value, treating it as empty");
                0
            }),
            None => 0,
        };

        let consumed = consumed.max(0) as u64;
        let allowed = consumed + u64::from(cost) <= u64::from(max_attempts);

        Ok(decide(max_attempts, consumed, reset_at, now, allowed, cost))
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        let now = self.clock.now_secs();

        let windows: Vec<u64> = self.windows.iter().map(|window| *window).collect();

        for window_seconds in windows {
            self.storage
                .delete(&format!("{key}:fixed:{}", now / window_seconds))
                .await?;
        }

        self.storage.delete(key).await?;

        Ok(())
    }
}
