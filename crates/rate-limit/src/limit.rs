//! Limit definitions and per-route policies.

use std::{fmt, time::Duration};

use config::{Algorithm, PartitionBy, RouteConfig, RouteLimit};

use crate::error::RateLimitError;

/// One limit: at most `attempts` units per `window_seconds`, counted by `algorithm`,
/// partitioned by `partition`.
///
/// Definitions are validated on construction and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LimitDefinition {
    attempts: u32,
    window_seconds: u64,
    algorithm: Algorithm,
    partition: PartitionBy,
}

impl LimitDefinition {
    /// Create a definition, rejecting zero attempts or an empty window.
    pub fn new(
        attempts: u32,
        window_seconds: u64,
        algorithm: Algorithm,
        partition: PartitionBy,
    ) -> Result<Self, RateLimitError> {
        if attempts == 0 {
            return Err(RateLimitError::InvalidLimit(
                "attempts must be greater than zero".to_string(),
            ));
        }

        if window_seconds == 0 {
            return Err(RateLimitError::InvalidLimit(
                "window must be at least one second".to_string(),
            ));
        }

        Ok(Self {
            attempts,
            window_seconds,
            algorithm,
            partition,
        })
    }

    /// Create a definition from an algorithm name such as `sliding` or `token_bucket`.
    pub fn parse(
        attempts: u32,
        window_seconds: u64,
        algorithm: &str,
        partition: PartitionBy,
    ) -> Result<Self, RateLimitError> {
        Self::new(attempts, window_seconds, algorithm.parse::<Algorithm>()?, partition)
    }

    /// Maximum units per window.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// The counting algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// What the limit is counted per.
    pub fn partition(&self) -> PartitionBy {
        self.partition
    }

    /// The storage key of this definition for an identity, before the algorithm suffix.
    pub(crate) fn storage_key(&self, identity: &str) -> String {
        format!(
            "{identity}:{}:{}:{}",
            self.partition, self.attempts, self.window_seconds
        )
    }

    /// Shorter windows first, then tighter limits.
    pub(crate) fn evaluation_order(&self) -> (u64, u32, Algorithm, PartitionBy) {
        (self.window_seconds, self.attempts, self.algorithm, self.partition)
    }
}

impl TryFrom<&RouteLimit> for LimitDefinition {
    type Error = RateLimitError;

    fn try_from(limit: &RouteLimit) -> Result<Self, Self::Error> {
        Self::new(limit.attempts, limit.decay_seconds, limit.algorithm, limit.by)
    }
}

impl fmt::Display for LimitDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} per {}s ({}, by {})",
            self.attempts, self.window_seconds, self.algorithm, self.partition
        )
    }
}

/// The resolved limits of a route: its own definitions, its cost, and whether tier limits still apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    cost: u32,
    tier_limits: bool,
    limits: Vec<LimitDefinition>,
}

impl RoutePolicy {
    /// Validate a route configuration.
    pub fn resolve(config: &RouteConfig) -> Result<Self, RateLimitError> {
        if config.cost == 0 {
            return Err(RateLimitError::InvalidCost(config.cost));
        }

        let limits = config
            .limits
            .iter()
            .map(LimitDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            cost: config.cost,
            tier_limits: config.tier_limits,
            limits,
        })
    }

    /// Units consumed by one request to the route.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Whether the tier limits of the caller apply in addition to the route limits.
    pub fn applies_tier_limits(&self) -> bool {
        self.tier_limits
    }

    /// The route's own limits.
    pub fn limits(&self) -> &[LimitDefinition] {
        &self.limits
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            cost: 1,
            tier_limits: true,
            limits: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempts_are_rejected() {
        let error = LimitDefinition::new(0, 60, Algorithm::Fixed, PartitionBy::Ip).unwrap_err();

        assert_eq!(
            error.to_string(),
            "Invalid rate limit: attempts must be greater than zero"
        );
    }

    #[test]
    fn zero_window_is_rejected() {
        let error = LimitDefinition::new(10, 0, Algorithm::Sliding, PartitionBy::User).unwrap_err();

        assert_eq!(
            error.to_string(),
            "Invalid rate limit: window must be at least one second"
        );
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let error = LimitDefinition::parse(10, 60, "leaky_bucket", PartitionBy::Ip).unwrap_err();

        assert!(matches!(error, RateLimitError::UnknownAlgorithm(_)));
        assert_eq!(
            error.to_string(),
            "unknown rate limit algorithm 'leaky_bucket', expected one of: fixed, sliding, token_bucket"
        );
    }

    #[test]
    fn parse_known_algorithm() {
        let limit = LimitDefinition::parse(10, 60, "token_bucket", PartitionBy::Custom).unwrap();

        assert_eq!(limit.algorithm(), Algorithm::TokenBucket);
        assert_eq!(limit.to_string(), "10 per 60s (token_bucket, by custom)");
    }

    #[test]
    fn storage_key_includes_partition_and_shape() {
        let limit = LimitDefinition::new(5, 60, Algorithm::Sliding, PartitionBy::Ip).unwrap();

        assert_eq!(limit.storage_key("1.2.3.4"), "1.2.3.4:ip:5:60");
    }

    #[test]
    fn route_policy_from_config() {
        let config = RouteConfig {
            cost: 3,
            tier_limits: false,
            limits: vec![RouteLimit {
                attempts: 10,
                decay_seconds: 60,
                algorithm: Algorithm::Fixed,
                by: PartitionBy::User,
            }],
        };

        let policy = RoutePolicy::resolve(&config).unwrap();

        assert_eq!(policy.cost(), 3);
        assert!(!policy.applies_tier_limits());
        assert_eq!(
            policy.limits(),
            &[LimitDefinition::new(10, 60, Algorithm::Fixed, PartitionBy::User).unwrap()]
        );
    }

    #[test]
    fn route_policy_rejects_zero_cost() {
        let config = RouteConfig {
            cost: 0,
            ..Default::default()
        };

        let error = RoutePolicy::resolve(&config).unwrap_err();

        assert!(matches!(error, RateLimitError::InvalidCost(0)));
    }

    #[test]
    fn route_policy_rejects_invalid_limits() {
        let config = RouteConfig {
            limits: vec![RouteLimit {
                attempts: 10,
                decay_seconds: 0,
                algorithm: Algorithm::Fixed,
                by: PartitionBy::Ip,
            }],
            ..Default::default()
        };

        let error = RoutePolicy::resolve(&config).unwrap_err();

        assert!(matches!(error, RateLimitError::InvalidLimit(_)));
    }
}
