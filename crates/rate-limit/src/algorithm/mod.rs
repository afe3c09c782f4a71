//! Counting algorithms.
//!
//! Every limiter is written against [`RateLimitStorage`] only, so the in-memory store proves the same
//! behavior as Redis. The three algorithms trade precision for cost:
//!
//! - [`FixedWindow`] keeps one counter per window. Cheap, but a burst straddling a window boundary can
//!   reach twice the nominal rate.
//! - [`SlidingWindow`] logs every request in a sorted set for exact rolling accounting.
//! - [`TokenBucket`] allows bursts up to the capacity while enforcing a steady average rate.

use std::sync::Arc;

use config::Algorithm;

use crate::{
    clock::Clock,
    result::RateLimitResult,
    storage::{RateLimitStorage, StorageError},
};

mod fixed_window;
mod lock;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

/// The contract shared by all counting algorithms.
///
/// `key` is an opaque identity; each algorithm derives its own storage keys from it.
#[allow(async_fn_in_trait)]
pub trait Limiter {
    /// Charge `cost` units against `key` and decide whether the request may proceed.
    async fn attempt(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError>;

    /// Decide whether a request of `cost` units would be allowed, without charging it.
    async fn check(
        &self,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError>;

    /// Remove all state of `key`.
    async fn reset(&self, key: &str) -> Result<(), StorageError>;
}

/// One instance of each algorithm sharing a storage backend and a clock.
pub(crate) struct Limiters<S> {
    fixed: FixedWindow<S>,
    sliding: SlidingWindow<S>,
    token_bucket: TokenBucket<S>,
}

impl<S: RateLimitStorage> Limiters<S> {
    pub(crate) fn new(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fixed: FixedWindow::new(storage.clone(), clock.clone()),
            sliding: SlidingWindow::new(storage.clone(), clock.clone()),
            token_bucket: TokenBucket::new(storage, clock),
        }
    }

    pub(crate) async fn attempt(
        &self,
        algorithm: Algorithm,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        match algorithm {
            Algorithm::Fixed => self.fixed.attempt(key, max_attempts, window_seconds, cost).await,
            Algorithm::Sliding => self.sliding.attempt(key, max_attempts, window_seconds, cost).await,
            Algorithm::TokenBucket => {
                self.token_bucket
                    .attempt(key, max_attempts, window_seconds, cost)
                    .await
            }
        }
    }

    pub(crate) async fn check(
        &self,
        algorithm: Algorithm,
        key: &str,
        max_attempts: u32,
        window_seconds: u64,
        cost: u32,
    ) -> Result<RateLimitResult, StorageError> {
        match algorithm {
            Algorithm::Fixed => self.fixed.check(key, max_attempts, window_seconds, cost).await,
            Algorithm::Sliding => self.sliding.check(key, max_attempts, window_seconds, cost).await,
            Algorithm::TokenBucket => {
                self.token_bucket
                    .check(key, max_attempts, window_seconds, cost)
                    .await
            }
        }
    }

    pub(crate) async fn reset(&self, algorithm: Algorithm, key: &str) -> Result<(), StorageError> {
        match algorithm {
            Algorithm::Fixed => self.fixed.reset(key).await,
            Algorithm::Sliding => self.sliding.reset(key).await,
            Algorithm::TokenBucket => self.token_bucket.reset(key).await,
        }
    }
}

/// Seconds from `now` until `reset_at`, never less than one.
fn retry_after(reset_at: u64, now: u64) -> u64 {
    reset_at.saturating_sub(now).max(1)
}
