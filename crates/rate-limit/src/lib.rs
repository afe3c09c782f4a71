//! Rate limiting and quota enforcement.
//!
//! Decides for an identity and a set of [`LimitDefinition`]s whether a request may proceed, and tracks
//! consumption in a [`RateLimitStorage`] backend:
//!
//! - three counting algorithms: fixed window, sliding window log and token bucket
//! - tiered limits resolved by the [`TierManager`], with per-route overrides and request cost
//! - in-memory storage for a single process, Redis for many
//!
//! The [`RateLimitManager`] folds the decisions of all definitions into one [`RateLimitResult`], which
//! renders to rate limit headers and a 429 response.

#![deny(missing_docs)]

pub mod algorithm;
pub mod clock;
mod error;
mod headers;
mod limit;
mod manager;
mod policy;
mod request;
mod result;
pub mod storage;
mod tier;

pub use config::{Algorithm, FailureMode, PartitionBy};
pub use error::RateLimitError;
pub use headers::{RATE_LIMIT_EXCEEDED, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
pub use limit::{LimitDefinition, RoutePolicy};
pub use manager::RateLimitManager;
pub use policy::FailurePolicy;
pub use request::{ANONYMOUS, RateLimitRequest, RateLimitRequestBuilder};
pub use result::RateLimitResult;
pub use storage::{InMemoryStorage, RateLimitStorage, RedisStorage, StorageBackend, StorageError};
pub use tier::{TierLimits, TierManager, TierWindow};
