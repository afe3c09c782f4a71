//! Rate limiting configuration structures.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use duration_str::deserialize_option_duration;
use serde::{Deserialize, Serialize};

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Tier used when a client's tier is unknown.
    #[serde(default = "default_tier")]
    pub default_tier: String,
    /// What the caller should do when the storage backend fails.
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Named tiers with their per-window request limits.
    #[serde(default)]
    pub tiers: BTreeMap<String, TierConfig>,
    /// Per-route limit overrides and cost multipliers, keyed by route name.
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            storage: StorageConfig::default(),
            default_tier: default_tier(),
            failure_mode: FailureMode::default(),
            tiers: BTreeMap::new(),
            routes: BTreeMap::new(),
        }
    }
}

fn default_tier() -> String {
    "anonymous".to_string()
}

/// Request limits of a single tier. A missing or zero value means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Requests allowed per minute.
    pub requests_per_minute: Option<u32>,
    /// Requests allowed per hour.
    pub requests_per_hour: Option<u32>,
    /// Requests allowed per day.
    pub requests_per_day: Option<u32>,
}

/// Limit overrides for a single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// How many units a single request to this route consumes.
    #[serde(default = "default_cost")]
    pub cost: u32,
    /// Whether the client's tier limits also apply to this route.
    #[serde(default = "default_tier_limits")]
    pub tier_limits: bool,
    /// Additional limits applied to this route.
    #[serde(default)]
    pub limits: Vec<RouteLimit>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            cost: default_cost(),
            tier_limits: default_tier_limits(),
            limits: Vec::new(),
        }
    }
}

fn default_cost() -> u32 {
    1
}

fn default_tier_limits() -> bool {
    true
}

/// A single per-route limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteLimit {
    /// Maximum number of attempts within the decay window.
    pub attempts: u32,
    /// Length of the window in seconds.
    pub decay_seconds: u64,
    /// Counting algorithm.
    #[serde(default)]
    pub algorithm: Algorithm,
    /// What the limit is partitioned by.
    #[serde(default)]
    pub by: PartitionBy,
}

/// Counting algorithm of a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Fixed window counter, cheap with a known boundary burst.
    #[default]
    #[serde(alias = "fixed_window")]
    Fixed,
    /// Log-based sliding window, exact but linear in the limit.
    #[serde(alias = "sliding_window")]
    Sliding,
    /// Token bucket, tolerates bursts up to the capacity.
    TokenBucket,
}

impl Algorithm {
    /// The configuration name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Fixed => "fixed",
            Algorithm::Sliding => "sliding",
            Algorithm::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rate limit algorithm '{0}', expected one of: fixed, sliding, token_bucket")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" | "fixed_window" => Ok(Algorithm::Fixed),
            "sliding" | "sliding_window" => Ok(Algorithm::Sliding),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

/// What a limit is partitioned by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionBy {
    /// Client IP address.
    #[default]
    Ip,
    /// Authenticated user.
    User,
    /// A caller provided key.
    Custom,
}

impl PartitionBy {
    /// The configuration name of the partition.
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionBy::Ip => "ip",
            PartitionBy::User => "user",
            PartitionBy::Custom => "custom",
        }
    }
}

impl fmt::Display for PartitionBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision taken by the caller when the storage backend is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the request through and log the failure.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default).
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all rate limit keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: Option<String>,
    /// Response timeout for Redis commands.
    #[serde(
        default = "default_response_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub response_timeout: Option<Duration>,
    /// Timeout for the initial connection check.
    #[serde(
        default = "default_connection_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub connection_timeout: Option<Duration>,
}

fn default_key_prefix() -> Option<String> {
    Some("quota:".to_string())
}

fn default_response_timeout() -> Option<Duration> {
    Some(Duration::from_secs(1))
}

fn default_connection_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Enable TLS (automatically enabled for rediss:// URLs).
    pub enabled: bool,
    /// Allow insecure connections (skip certificate validation).
    pub insecure: Option<bool>,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
