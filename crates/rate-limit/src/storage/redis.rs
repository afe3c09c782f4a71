//! Redis-based rate limit storage, shared by every process pointing at the same server.

use std::time::Duration;

use config::RedisConfig;
use redis::{FromRedisValue, RedisError};

use super::redis_pool::{self, Pool};
use super::{RateLimitStorage, ScoreBound, StorageError};

/// Longest expiry sent to Redis, which rejects values that overflow its millisecond clock.
const MAX_EXPIRE_SECONDS: u64 = 100 * 365 * 86_400;

/// Redis-based rate limit storage implementation.
pub struct RedisStorage {
    /// Redis connection pool.
    pool: Pool,
    /// Key prefix for all rate limit keys.
    key_prefix: String,
    /// Response timeout for Redis commands.
    response_timeout: Duration,
}

impl RedisStorage {
    /// Create a new Redis storage instance and verify the server answers.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        let storage = Self {
            pool,
            key_prefix: config.key_prefix.clone().unwrap_or_default(),
            response_timeout: config.response_timeout.unwrap_or_else(|| Duration::from_secs(1)),
        };

        let connection_timeout = config.connection_timeout.unwrap_or_else(|| Duration::from_secs(5));

        let pong: String = tokio::time::timeout(connection_timeout, storage.run("", &redis::cmd("PING")))
            .await
            .map_err(|_| StorageError::Timeout(connection_timeout))?
            .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

        log::debug!("Connected to Redis rate limit storage ({pong})");

        Ok(storage)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn run<T: FromRedisValue>(&self, key: &str, cmd: &redis::Cmd) -> Result<T, StorageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        cmd.query_async::<T>(&mut *conn)
            .await
            .map_err(|error| storage_error(key, error))
    }

    async fn query<T: FromRedisValue>(&self, key: &str, cmd: redis::Cmd) -> Result<T, StorageError> {
        tokio::time::timeout(self.response_timeout, self.run(key, &cmd))
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))?
    }
}

fn storage_error(key: &str, error: RedisError) -> StorageError {
    if error.code() == Some("WRONGTYPE") {
        return StorageError::WrongType { key: key.to_string() };
    }

    if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() {
        return StorageError::Connection(error.to_string());
    }

    StorageError::Query(error.to_string())
}

impl RateLimitStorage for RedisStorage {
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(self.key(key)).arg(amount);

        self.query(key, cmd).await
    }

    async fn decrement(&self, key: &str, amount: i64) -> Result<i64, StorageError> {
        let mut cmd = redis::cmd("DECRBY");
        cmd.arg(self.key(key)).arg(amount);

        self.query(key, cmd).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.key(key));

        self.query(key, cmd).await
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, StorageError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);

        if ttl_seconds > 0 {
            cmd.arg("EX").arg(ttl_seconds.min(MAX_EXPIRE_SECONDS));
        }

        let reply: Option<String> = self.query(key, cmd).await?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.key(key));

        let removed: i64 = self.query(key, cmd).await?;

        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StorageError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(self.key(key)).arg(seconds.min(MAX_EXPIRE_SECONDS));

        let updated: i64 = self.query(key, cmd).await?;

        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StorageError> {
        let mut cmd = redis::cmd("TTL");
        cmd.arg(self.key(key));

        self.query(key, cmd).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(self.key(key));

        let count: i64 = self.query(key, cmd).await?;

        Ok(count > 0)
    }

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> Result<bool, StorageError> {
        if members.is_empty() {
            return Ok(false);
        }

        let mut cmd = redis::cmd("ZADD");
        cmd.arg(self.key(key));

        for (member, score) in members {
            cmd.arg(*score).arg(member);
        }

        let added: i64 = self.query(key, cmd).await?;

        Ok(added > 0)
    }

    async fn zremrangebyscore(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Result<u64, StorageError> {
        let mut cmd = redis::cmd("ZREMRANGEBYSCORE");
        cmd.arg(self.key(key)).arg(min.to_string()).arg(max.to_string());

        self.query(key, cmd).await
    }

    async fn zcard(&self, key: &str) -> Result<u64, StorageError> {
        let mut cmd = redis::cmd("ZCARD");
        cmd.arg(self.key(key));

        self.query(key, cmd).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        let mut cmd = redis::cmd("ZRANGE");
        cmd.arg(self.key(key)).arg(start).arg(stop);

        self.query(key, cmd).await
    }
}
