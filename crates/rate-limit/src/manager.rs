//! Rate limit manager implementation.

use std::{collections::BTreeMap, sync::Arc};

use config::{FailureMode, RateLimitConfig};
use dashmap::DashSet;
use telemetry::{
    Counter, KeyValue,
    metrics::{self, RATE_LIMIT_DECISIONS, RATE_LIMIT_EVALUATION_DURATION, RATE_LIMIT_STORAGE_ERRORS, Recorder},
};

use crate::{
    algorithm::Limiters,
    clock::{Clock, SystemClock},
    error::RateLimitError,
    limit::{LimitDefinition, RoutePolicy},
    request::RateLimitRequest,
    result::RateLimitResult,
    storage::{RateLimitStorage, StorageBackend},
    tier::TierManager,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evaluation {
    Attempt,
    Check,
}

/// Evaluates limit definitions against their algorithms and folds the outcomes into one decision.
///
/// Every definition is evaluated exactly once per call, shortest window first, so each quota is
/// charged consistently regardless of which one denies. Storage errors are returned to the caller,
/// see [`crate::FailurePolicy`] for turning them into decisions.
pub struct RateLimitManager<S = StorageBackend> {
    enabled: bool,
    failure_mode: FailureMode,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    limiters: Limiters<S>,
    tiers: TierManager,
    routes: BTreeMap<String, RoutePolicy>,
    /// Definitions evaluated so far, so that a reset also reaches limits passed in by callers.
    seen: DashSet<LimitDefinition>,
    decisions: Counter<u64>,
    storage_errors: Counter<u64>,
}

impl RateLimitManager<StorageBackend> {
    /// Create a manager with the storage backend selected by the configuration.
    pub async fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let storage = StorageBackend::from_config(&config.storage).await?;

        log::debug!("Rate limiting uses {} storage", storage.kind());

        Self::with_storage(config, storage, Arc::new(SystemClock))
    }
}

impl<S: RateLimitStorage> RateLimitManager<S> {
    /// Create a manager over the given storage and clock, validating tiers and routes.
    pub fn with_storage(config: &RateLimitConfig, storage: S, clock: Arc<dyn Clock>) -> Result<Self, RateLimitError> {
        let tiers = TierManager::new(&config.tiers, config.default_tier.clone())?;

        let routes = config
            .routes
            .iter()
            .map(|(route, route_config)| Ok((route.clone(), RoutePolicy::resolve(route_config)?)))
            .collect::<Result<BTreeMap<_, _>, RateLimitError>>()?;

        let mut manager = Self::new(tiers, storage, clock);
        manager.enabled = config.enabled;
        manager.failure_mode = config.failure_mode;
        manager.routes = routes;

        Ok(manager)
    }

    /// Create an enabled manager without route policies.
    pub fn new(tiers: TierManager, storage: S, clock: Arc<dyn Clock>) -> Self {
        let storage = Arc::new(storage);
        let meter = metrics::meter();

        Self {
            enabled: true,
            failure_mode: FailureMode::default(),
            limiters: Limiters::new(storage.clone(), clock.clone()),
            storage,
            clock,
            tiers,
            routes: BTreeMap::new(),
            seen: DashSet::new(),
            decisions: meter.u64_counter(RATE_LIMIT_DECISIONS).build(),
            storage_errors: meter.u64_counter(RATE_LIMIT_STORAGE_ERRORS).build(),
        }
    }

    /// Whether rate limiting is enabled. A disabled manager allows everything without touching storage.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The configured behavior on storage failures.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// The tier configuration.
    pub fn tiers(&self) -> &TierManager {
        &self.tiers
    }

    /// The storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The policy of a configured route.
    pub fn route(&self, route: &str) -> Result<&RoutePolicy, RateLimitError> {
        self.routes
            .get(route)
            .ok_or_else(|| RateLimitError::UnknownRoute(route.to_string()))
    }

    /// The limits and cost of a request in `tier` to `route`.
    ///
    /// Tier limits apply unless the route opts out, followed by the route's own limits. Requests to
    /// routes without configuration only get the tier limits and cost one unit.
    pub fn limits_for(&self, tier: &str, route: Option<&str>) -> (Vec<LimitDefinition>, u32) {
        let policy = route.and_then(|route| {
            let policy = self.routes.get(route);

            if policy.is_none() {
                log::debug!("No rate limit policy for route '{route}', applying tier limits only");
            }

            policy
        });

        let mut limits = match policy {
            Some(policy) if !policy.applies_tier_limits() => Vec::new(),
            _ => self.tiers.create_default_limits(tier),
        };

        if let Some(policy) = policy {
            limits.extend_from_slice(policy.limits());
        }

        (limits, policy.map_or(1, RoutePolicy::cost))
    }

    /// Charge `cost` units to `identity` under every definition and decide.
    ///
    /// Without definitions the request is allowed with an unlimited result.
    pub async fn attempt(
        &self,
        identity: &str,
        limits: &[LimitDefinition],
        cost: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        self.evaluate(|_| identity.to_string(), limits, cost, Evaluation::Attempt)
            .await
    }

    /// Decide whether `identity` could spend `cost` units under every definition, without charging.
    pub async fn check(
        &self,
        identity: &str,
        limits: &[LimitDefinition],
        cost: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        self.evaluate(|_| identity.to_string(), limits, cost, Evaluation::Check)
            .await
    }

    /// Like [`Self::attempt`], counting each definition against the part of the request it is
    /// partitioned by.
    pub async fn attempt_request(
        &self,
        request: &RateLimitRequest,
        limits: &[LimitDefinition],
        cost: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        self.evaluate(
            |limit| request.discriminator(limit.partition()),
            limits,
            cost,
            Evaluation::Attempt,
        )
        .await
    }

    /// Like [`Self::check`], with the identities of [`Self::attempt_request`].
    pub async fn check_request(
        &self,
        request: &RateLimitRequest,
        limits: &[LimitDefinition],
        cost: u32,
    ) -> Result<RateLimitResult, RateLimitError> {
        self.evaluate(
            |limit| request.discriminator(limit.partition()),
            limits,
            cost,
            Evaluation::Check,
        )
        .await
    }

    /// Remove all state of `identity` under every definition seen or configured.
    ///
    /// Storage failures are logged and ignored, resetting an identity twice is a no-op.
    pub async fn reset(&self, identity: &str) {
        self.reset_with(|_| identity.to_string()).await;
    }

    /// Like [`Self::reset`], for every identity the request is partitioned by.
    pub async fn reset_request(&self, request: &RateLimitRequest) {
        self.reset_with(|limit| request.discriminator(limit.partition()))
            .await;
    }

    async fn reset_with(&self, identity: impl Fn(&LimitDefinition) -> String) {
        for limit in self.known_limits() {
            let key = limit.storage_key(&identity(&limit));

            if let Err(e) = self.limiters.reset(limit.algorithm(), &key).await {
                log::warn!("Failed to reset rate limit '{key}': {e}");
            }
        }
    }

    /// Every definition produced by the tiers or routes, or evaluated by this manager.
    fn known_limits(&self) -> Vec<LimitDefinition> {
        let mut limits: Vec<LimitDefinition> = self.seen.iter().map(|limit| *limit).collect();

        for tier in self.tiers.tier_names() {
            limits.extend(self.tiers.create_default_limits(tier));
        }

        for policy in self.routes.values() {
            limits.extend_from_slice(policy.limits());
        }

        limits.sort_by_key(LimitDefinition::evaluation_order);
        limits.dedup();

        limits
    }

    async fn evaluate(
        &self,
        identity: impl Fn(&LimitDefinition) -> String,
        limits: &[LimitDefinition],
        cost: u32,
        evaluation: Evaluation,
    ) -> Result<RateLimitResult, RateLimitError> {
        if cost == 0 {
            return Err(RateLimitError::InvalidCost(cost));
        }

        if !self.enabled || limits.is_empty() {
            return Ok(RateLimitResult::unlimited(self.clock.now_secs(), u64::from(cost)));
        }

        let mut ordered = limits.to_vec();
        ordered.sort_by_key(LimitDefinition::evaluation_order);
        ordered.dedup();

        let mut decision: Option<RateLimitResult> = None;

        for limit in ordered {
            let key = limit.storage_key(&identity(&limit));
            let result = self.evaluate_one(&limit, &key, cost, evaluation).await?;

            log::debug!(
                "Rate limit {limit} for '{key}': allowed={}, remaining={}",
                result.allowed,
                result.remaining
            );

            decision = Some(match decision {
                Some(decision) => decision.fold(result),
                None => result,
            });
        }

        let decision = decision.unwrap_or_else(|| RateLimitResult::unlimited(self.clock.now_secs(), u64::from(cost)));

        if evaluation == Evaluation::Attempt {
            self.decisions
                .add(1, &[KeyValue::new("allowed", decision.allowed)]);
        }

        Ok(decision)
    }

    async fn evaluate_one(
        &self,
        limit: &LimitDefinition,
        key: &str,
        cost: u32,
        evaluation: Evaluation,
    ) -> Result<RateLimitResult, RateLimitError> {
        let algorithm = limit.algorithm();

        let mut recorder = Recorder::new(RATE_LIMIT_EVALUATION_DURATION);
        recorder.push_attribute("algorithm", algorithm.as_str());

        let outcome = match evaluation {
            Evaluation::Attempt => {
                self.seen.insert(*limit);

                self.limiters
                    .attempt(algorithm, key, limit.attempts(), limit.window_seconds(), cost)
                    .await
            }
            Evaluation::Check => {
                self.limiters
                    .check(algorithm, key, limit.attempts(), limit.window_seconds(), cost)
                    .await
            }
        };

        recorder.record();

        outcome.map_err(|error| {
            self.storage_errors
                .add(1, &[KeyValue::new("algorithm", algorithm.as_str())]);

            RateLimitError::Storage(error)
        })
    }
}

#[cfg(test)]
mod tests {
    use config::{Algorithm, PartitionBy, RouteConfig, RouteLimit, TierConfig};

    use super::*;
    use crate::{clock::ManualClock, storage::InMemoryStorage};

    const START_SECS: u64 = 1_700_000_000;

    fn config() -> RateLimitConfig {
        let mut config = RateLimitConfig {
            enabled: true,
            default_tier: "free".to_string(),
            ..Default::default()
        };

        config.tiers.insert(
            "free".to_string(),
            TierConfig {
                requests_per_minute: Some(5),
                requests_per_hour: Some(100),
                requests_per_day: None,
            },
        );

        config.routes.insert(
            "POST /upload".to_string(),
            RouteConfig {
                cost: 3,
                tier_limits: true,
                limits: vec![RouteLimit {
                    attempts: 10,
                    decay_seconds: 60,
                    algorithm: Algorithm::Fixed,
                    by: PartitionBy::User,
                }],
            },
        );

        config.routes.insert(
            "GET /health".to_string(),
            RouteConfig {
                tier_limits: false,
                ..Default::default()
            },
        );

        config
    }

    fn manager() -> (RateLimitManager<InMemoryStorage>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::from_secs(START_SECS));
        let storage = InMemoryStorage::with_clock(clock.clone());
        let manager = RateLimitManager::with_storage(&config(), storage, clock.clone()).unwrap();

        (manager, clock)
    }

    #[tokio::test]
    async fn no_limits_is_unlimited() {
        let (manager, _) = manager();

        let result = manager.attempt("ip:1.2.3.4", &[], 1).await.unwrap();

        assert!(result.allowed);
        assert!(result.is_unlimited());
        assert!(manager.storage().is_empty());
    }

    #[tokio::test]
    async fn zero_cost_is_rejected() {
        let (manager, _) = manager();
        let (limits, _) = manager.limits_for("free", None);

        let error = manager.attempt("ip:1.2.3.4", &limits, 0).await.unwrap_err();

        assert!(matches!(error, RateLimitError::InvalidCost(0)));
    }

    #[tokio::test]
    async fn disabled_manager_allows_everything() {
        let clock = Arc::new(ManualClock::from_secs(START_SECS));
        let config = RateLimitConfig {
            enabled: false,
            ..config()
        };

        let manager = RateLimitManager::with_storage(&config, InMemoryStorage::with_clock(clock.clone()), clock).unwrap();
        let (limits, _) = manager.limits_for("free", None);

        for _ in 0..10 {
            assert!(manager.attempt("ip:1.2.3.4", &limits, 1).await.unwrap().allowed);
        }

        assert!(!manager.is_enabled());
        assert!(manager.storage().is_empty());
    }

    #[tokio::test]
    async fn unknown_default_tier_fails_construction() {
        let config = RateLimitConfig {
            default_tier: "missing".to_string(),
            ..config()
        };

        let result = RateLimitManager::with_storage(&config, InMemoryStorage::new(), Arc::new(SystemClock));

        assert!(matches!(result, Err(RateLimitError::UnknownDefaultTier(tier)) if tier == "missing"));
    }

    #[test]
    fn route_limits_and_cost() {
        let (manager, _) = manager();

        let (limits, cost) = manager.limits_for("free", Some("POST /upload"));

        assert_eq!(cost, 3);
        assert_eq!(
            limits,
            vec![
                LimitDefinition::new(5, 60, Algorithm::Sliding, PartitionBy::Ip).unwrap(),
                LimitDefinition::new(100, 3600, Algorithm::Sliding, PartitionBy::Ip).unwrap(),
                LimitDefinition::new(10, 60, Algorithm::Fixed, PartitionBy::User).unwrap(),
            ]
        );
    }

    #[test]
    fn routes_can_opt_out_of_tier_limits() {
        let (manager, _) = manager();

        let (limits, cost) = manager.limits_for("free", Some("GET /health"));

        assert!(limits.is_empty());
        assert_eq!(cost, 1);
    }

    #[test]
    fn unknown_routes_get_tier_limits() {
        let (manager, _) = manager();

        let (limits, cost) = manager.limits_for("free", Some("GET /unknown"));

        assert_eq!(limits.len(), 2);
        assert_eq!(cost, 1);
        assert!(matches!(
            manager.route("GET /unknown"),
            Err(RateLimitError::UnknownRoute(route)) if route == "GET /unknown"
        ));
    }

    #[tokio::test]
    async fn duplicate_definitions_are_charged_once() {
        let (manager, _) = manager();
        let limit = LimitDefinition::new(2, 60, Algorithm::Fixed, PartitionBy::Ip).unwrap();

        let result = manager.attempt("ip:1.2.3.4", &[limit, limit], 1).await.unwrap();

        assert!(result.allowed);
        assert_eq!(result.remaining, 1);
    }

    #[tokio::test]
    async fn check_does_not_charge() {
        let (manager, _) = manager();
        let (limits, _) = manager.limits_for("free", None);

        for _ in 0..10 {
            let result = manager.check("ip:1.2.3.4", &limits, 1).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, 5);
        }
    }

    #[tokio::test]
    async fn requests_are_partitioned_per_definition() {
        let (manager, _) = manager();
        let (limits, cost) = manager.limits_for("free", Some("POST /upload"));

        let alice = RateLimitRequest::builder().ip_str("1.2.3.4").unwrap().user("alice").build();
        let bob = RateLimitRequest::builder().ip_str("1.2.3.4").unwrap().user("bob").build();

        // the shared IP binds first: 5 per minute at cost 3
        let result = manager.attempt_request(&alice, &limits, cost).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 2);

        let result = manager.attempt_request(&bob, &limits, cost).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, 2);
    }

    #[tokio::test]
    async fn reset_clears_every_definition() {
        let (manager, _) = manager();
        let (limits, _) = manager.limits_for("free", None);
        let custom = LimitDefinition::new(1, 30, Algorithm::TokenBucket, PartitionBy::Custom).unwrap();

        for _ in 0..5 {
            manager.attempt("ip:1.2.3.4", &limits, 1).await.unwrap();
        }
        manager.attempt("ip:1.2.3.4", &[custom], 1).await.unwrap();

        manager.reset("ip:1.2.3.4").await;
        manager.reset("ip:1.2.3.4").await;

        assert!(manager.storage().is_empty());
        assert!(manager.attempt("ip:1.2.3.4", &limits, 1).await.unwrap().allowed);
        assert!(manager.attempt("ip:1.2.3.4", &[custom], 1).await.unwrap().allowed);
    }
}
