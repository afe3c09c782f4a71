//! Token bucket with JSON state persisted per key.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Limiter, lock::KeyLocks};
use crate::{
    clock::Clock,
    result::RateLimitResult,
    storage::{RateLimitStorage, StorageError},
};

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct BucketState {
    tokens: f64,
    /// Unix time in seconds, with millisecond precision.
    last_refill_at: f64,
}

/// A bucket of `max_attempts` tokens refilled at `max_attempts / window_seconds` tokens per second.
///
/// Bursts up to the full capacity are allowed, after which requests are admitted at the refill rate.
pub struct TokenBucket<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl<S> TokenBucket<S> {
    /// Create a limiter over the given storage.
    pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            locks: KeyLocks::new(),
        }
    }
}

/// A bucket refilled up to the current time.
struct Refilled {
    tokens: f64,
    capacity: f64,
    rate: f64,
    now: f64,
}

impl<S: RateLimitStorage> TokenBucket<S> {
    /// Load the bucket and add the tokens earned since its last refill.
    async fn refill(&self, bucket_key: &str, max_attempts: u32, window_seconds: u64) -> Result<Refilled, StorageError> {
        let capacity = f64::from(max_attempts);
        let rate = capacity / window_seconds.max(1) as f64;
        let now = self.clock.now_millis() as f64 / 1000.0;

        let state = match self.storage.get(bucket_key).await? {
            Some(raw) => serde_json::from_str::<BucketState>(&raw).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable token bucket state at '{bucket_key}': {e}");
                BucketState {
                    tokens: capacity,
                    last_refill_at: now,
                }
            }),
            None => BucketState {
                tokens: capacity,
                last_refill_at: now,
            },
        };

        // A clock that went backwards earns nothing.
        let elapsed = (now - state.last_refill_at).max(0.0);
        let tokens = (state.tokens + elapsed * rate).clamp(0.0, capacity);

        Ok(Refilled {
            tokens,
            capacity,
            rate,
            now,
        })
    }

    fn decide(bucket: &Refilled, max_attempts: u32, allowed: bool, cost: u32) -> RateLimitResult {
        let limit = u64::from(max_attempts);
        let remaining = bucket.tokens.floor() as u64;
        let now = bucket.now;

        if allowed {
            let until_full = (bucket.capacity - bucket.tokens) / bucket.rate;
            RateLimitResult::allowed(limit, remaining, (now + until_full).ceil() as u64, u64::from(cost))
        } else {
            let wait = ((f64::from(cost) - bucket.tokens) / bucket.rate).max(0.0);

            RateLimitResult::denied(
                limit,
                remaining,
                (now + wait).ceil() as u64,
                wait.ceil() as u64,
                u64::from(cost),
            )
        }
    }
}

impl<S: RateLimitStorage> Limiter for TokenBucket<S> {
    async fn attempt(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        let bucket_key = format!("{key}:token_bucket");
        let _guard = self.locks.lock(&bucket_key).await;

        let mut bucket = self.refill(&bucket_key, max_attempts, window_seconds).await?;

        if cost > max_attempts {
            log::warn!(
                "Request cost {cost} exceeds the capacity {max_attempts} of token bucket '{key}' and can never be allowed"
            );
        }

        let allowed = bucket.tokens >= f64::from(cost);

        if allowed {
            bucket.tokens -= f64::from(cost);
        }

        // The refill is persisted even on denial, otherwise the elapsed time would be credited again.
        let state = BucketState {
            tokens: bucket.tokens,
            last_refill_at: bucket.now,
        };

        let serialized = serde_json::to_string(&state).map_err(|e| StorageError::Internal(e.to_string()))?;

        self.storage
            .set(&bucket_key, &serialized, window_seconds.max(1).saturating_mul(2))
            .await?;

        Ok(Self::decide(&bucket, max_attempts, allowed, cost))
    }

    async fn check(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        let bucket_key = format!("{key}:token_bucket");
        let _guard = self.locks.lock(&bucket_key).await;

        let bucket = self.refill(&bucket_key, max_attempts, window_seconds).await?;
        let allowed = bucket.tokens >= f64::from(cost);

        Ok(Self::decide(&bucket, max_attempts, allowed, cost))
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        self.storage.delete(&format!("{key}:token_bucket")).await?;

        Ok(())
    }
}
