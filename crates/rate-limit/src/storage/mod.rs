//! Storage backends for rate limiting.
//!
//! The limiters are written purely against [`RateLimitStorage`], a small set of atomic counter and
//! sorted-set primitives. Every operation must be atomic for a single key. Reads of missing keys
//! never fail, they return the documented empty value or sentinel.

use std::{fmt, str::FromStr, time::Duration};

use config::StorageConfig;

pub mod memory;
pub mod redis;
mod redis_pool;

pub use self::memory::InMemoryStorage;
pub use self::redis::RedisStorage;

/// Returned by [`RateLimitStorage::ttl`] for a key without expiry.
pub const TTL_NO_EXPIRY: i64 = -1;

/// Returned by [`RateLimitStorage::ttl`] for a missing key.
pub const TTL_MISSING: i64 = -2;

/// Trait for rate limit storage backends.
#[allow(async_fn_in_trait)]
pub trait RateLimitStorage: Send + Sync {
    /// Atomically add `amount` to the integer at `key` and return the new value. Missing keys start at zero.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StorageError>;

    /// Atomically subtract `amount` from the integer at `key` and return the new value.
    async fn decrement(&self, key: &str, amount: i64) -> Result<i64, StorageError>;

    /// Read the value at `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` at `key`, replacing any previous value. A `ttl_seconds` of zero stores without expiry.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, StorageError>;

    /// Delete `key`, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Set or overwrite the expiry of `key`. Returns false if the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StorageError>;

    /// Remaining time to live in seconds, [`TTL_NO_EXPIRY`] or [`TTL_MISSING`].
    async fn ttl(&self, key: &str) -> Result<i64, StorageError>;

    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Add members with their scores to the sorted set at `key`. Returns true if any member was new.
    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> Result<bool, StorageError>;

    /// Remove all members with a score within `min..=max` and return how many were removed.
    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Result<u64, StorageError>;

    /// Number of members in the sorted set at `key`.
    async fn zcard(&self, key: &str) -> Result<u64, StorageError>;

    /// Members ranked `start..=stop` by ascending score. Negative indices count from the end.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Could not reach the storage backend.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The backend rejected or failed a command.
    #[error("Query error: {0}")]
    Query(String),
    /// The backend did not answer in time.
    #[error("Storage did not respond within {0:?}")]
    Timeout(Duration),
    /// The operation does not match the type of the stored value.
    #[error("Operation against key '{key}' holding the wrong kind of value")]
    WrongType {
        /// The offending key.
        key: String,
    },
    /// Internal storage error.
    #[error("Storage error: {0}")]
    Internal(String),
}

/// One end of a score range, with the syntax of `ZREMRANGEBYSCORE`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    /// `-inf`
    NegInfinity,
    /// `+inf`
    PosInfinity,
    /// A score included in the range.
    Inclusive(f64),
    /// A score excluded from the range, written `(score`.
    Exclusive(f64),
}

impl ScoreBound {
    /// Whether `score` lies above this bound when used as the lower end of a range.
    pub fn admits_from_below(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInfinity => true,
            ScoreBound::PosInfinity => false,
            ScoreBound::Inclusive(bound) => score >= bound,
            ScoreBound::Exclusive(bound) => score > bound,
        }
    }

    /// Whether `score` lies below this bound when used as the upper end of a range.
    pub fn admits_from_above(&self, score: f64) -> bool {
        match *self {
            ScoreBound::NegInfinity => false,
            ScoreBound::PosInfinity => true,
            ScoreBound::Inclusive(bound) => score <= bound,
            ScoreBound::Exclusive(bound) => score < bound,
        }
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreBound::NegInfinity => f.write_str("-inf"),
            ScoreBound::PosInfinity => f.write_str("+inf"),
            ScoreBound::Inclusive(score) => write!(f, "{score}"),
            ScoreBound::Exclusive(score) => write!(f, "({score}"),
        }
    }
}

impl FromStr for ScoreBound {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |value: &str| {
            value
                .parse::<f64>()
                .ok()
                .filter(|score| !score.is_nan())
                .ok_or_else(|| StorageError::Query(format!("min or max is not a float: '{s}'")))
        };

        match s {
            "-inf" => Ok(ScoreBound::NegInfinity),
            "+inf" | "inf" => Ok(ScoreBound::PosInfinity),
            _ => match s.strip_prefix('(') {
                Some(rest) => parse(rest).map(ScoreBound::Exclusive),
                None => parse(s).map(ScoreBound::Inclusive),
            },
        }
    }
}

/// The storage backend selected by configuration.
pub enum StorageBackend {
    /// Single-process in-memory storage.
    Memory(InMemoryStorage),
    /// Shared Redis storage.
    Redis(RedisStorage),
}

impl StorageBackend {
    /// Build the backend described by the configuration.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend = match config {
            StorageConfig::Memory => StorageBackend::Memory(InMemoryStorage::new()),
            StorageConfig::Redis(redis_config) => StorageBackend::Redis(RedisStorage::new(redis_config).await?),
        };

        Ok(backend)
    }

    /// Short name of the backend for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageBackend::Memory(_) => "memory",
            StorageBackend::Redis(_) => "redis",
        }
    }
}

impl From<InMemoryStorage> for StorageBackend {
    fn from(storage: InMemoryStorage) -> Self {
        StorageBackend::Memory(storage)
    }
}

impl From<RedisStorage> for StorageBackend {
    fn from(storage: RedisStorage) -> Self {
        StorageBackend::Redis(storage)
    }
}

impl RateLimitStorage for StorageBackend {
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.increment(key, amount).await,
            StorageBackend::Redis(storage) => storage.increment(key, amount).await,
        }
    }

    async fn decrement(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.decrement(key, amount).await,
            StorageBackend::Redis(storage) => storage.decrement(key, amount).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.get(key).await,
            StorageBackend::Redis(storage) => storage.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.set(key, value, ttl_seconds).await,
            StorageBackend::Redis(storage) => storage.set(key, value, ttl_seconds).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.delete(key).await,
            StorageBackend::Redis(storage) => storage.delete(key).await,
        }
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.expire(key, seconds).await,
            StorageBackend::Redis(storage) => storage.expire(key, seconds).await,
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.ttl(key).await,
            StorageBackend::Redis(storage) => storage.ttl(key).await,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.exists(key).await,
            StorageBackend::Redis(storage) => storage.exists(key).await,
        }
    }

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> Result<bool, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.zadd(key, members).await,
            StorageBackend::Redis(storage) => storage.zadd(key, members).await,
        }
    }

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Result<u64, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.zremrangebyscore(key, min, max).await,
            StorageBackend::Redis(storage) => storage.zremrangebyscore(key, min, max).await,
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.zcard(key).await,
            StorageBackend::Redis(storage) => storage.zcard(key).await,
        }
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        match self {
            StorageBackend::Memory(storage) => storage.zrange(key, start, stop).await,
            StorageBackend::Redis(storage) => storage.zrange(key, start, stop).await,
        }
    }
}
