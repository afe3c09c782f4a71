//! Error types for rate limiting.

use crate::storage::StorageError;

/// Errors that can occur during rate limiting.
///
/// A request over its limit is not an error, it is reported through [`crate::RateLimitResult::allowed`].
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// A limit definition with zero attempts or a zero window.
    #[error("Invalid rate limit: {0}")]
    InvalidLimit(String),

    /// An algorithm name that does not match any limiter.
    #[error(transparent)]
    UnknownAlgorithm(#[from] config::UnknownAlgorithm),

    /// Tiers are configured but the default tier is not one of them.
    #[error("Default tier '{0}' is not defined in the configured tiers")]
    UnknownDefaultTier(String),

    /// A request cost below one.
    #[error("Invalid request cost {0}, the cost must be at least 1")]
    InvalidCost(u32),

    /// A route lookup for a route without configuration.
    #[error("No rate limits configured for route '{0}'")]
    UnknownRoute(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RateLimitError {
    /// Whether this error is a storage failure rather than a configuration mistake.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
