use std::sync::Arc;

use args::{Args, Command, RequestArgs};
use clap::Parser;
use config::Config;
use rate_limit::{
    FailurePolicy, InMemoryStorage, RateLimitError, RateLimitManager, RateLimitResult, StorageBackend, TierWindow,
    clock::SystemClock,
};
use serde_json::json;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.config()?;

    logger::init(&args)?;

    let _telemetry = telemetry::init(&config.telemetry)?;

    match &args.command {
        Command::Attempt(request) => evaluate(&config, request, true).await,
        Command::Check(request) => evaluate(&config, request, false).await,
        Command::Reset(request) => reset(&config, request).await,
        Command::Tiers => tiers(&config),
        Command::Validate => validate(&config),
    }
}

async fn evaluate(config: &Config, args: &RequestArgs, charge: bool) -> anyhow::Result<()> {
    for decision in decisions(config, args, charge).await? {
        println!("{decision}");
    }

    Ok(())
}

async fn decisions(config: &Config, args: &RequestArgs, charge: bool) -> anyhow::Result<Vec<serde_json::Value>> {
    // An unreachable backend at startup is decided by the failure mode like any later storage error.
    let (manager, unavailable) = match RateLimitManager::from_config(&config.rate_limits).await {
        Ok(manager) => (manager, None),
        Err(RateLimitError::Storage(error)) => (offline(config)?, Some(error)),
        Err(error) => return Err(error.into()),
    };

    if !manager.is_enabled() {
        log::warn!("Rate limiting is disabled in the configuration, every request is allowed");
    }

    let tier = args.tier.as_deref().unwrap_or(manager.tiers().default_tier());
    let (limits, route_cost) = manager.limits_for(tier, args.route.as_deref());
    let cost = args.cost.unwrap_or(route_cost);
    let request = args.request();

    log::info!(
        "Evaluating {} request(s) in tier '{}' against {} limit(s) at cost {cost}",
        args.count,
        manager.tiers().resolve(tier),
        limits.len()
    );

    let mut decisions = Vec::new();

    for i in 1..=args.count {
        let outcome = match &unavailable {
            Some(error) if manager.is_enabled() => Err(RateLimitError::from(error.clone())),
            _ if charge => manager.attempt_request(&request, &limits, cost).await,
            _ => manager.check_request(&request, &limits, cost).await,
        };

        let result = manager.failure_mode().apply(outcome, cost)?;

        decisions.push(render(i, &result));
    }

    Ok(decisions)
}

/// A manager with the configured tiers and routes over throwaway in-memory storage.
fn offline(config: &Config) -> anyhow::Result<RateLimitManager> {
    let storage = StorageBackend::from(InMemoryStorage::new());

    Ok(RateLimitManager::with_storage(&config.rate_limits, storage, Arc::new(SystemClock))?)
}

fn render(request: u32, result: &RateLimitResult) -> serde_json::Value {
    let bounded = |value: u64| (!result.is_unlimited()).then_some(value);

    json!({
        "allowed": result.allowed,
        "cost": result.cost,
        "limit": bounded(result.limit),
        "remaining": bounded(result.remaining),
        "request": request,
        "reset_at": result.reset_at,
        "retry_after": result.retry_after,
    })
}

async fn reset(config: &Config, args: &RequestArgs) -> anyhow::Result<()> {
    let manager = match RateLimitManager::from_config(&config.rate_limits).await {
        Ok(manager) => manager,
        Err(RateLimitError::Storage(error)) => {
            log::warn!("Rate limit storage is unavailable, nothing was reset: {error}");
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    manager.reset_request(&args.request()).await;

    log::info!("Rate limit state reset");

    Ok(())
}

fn tiers(config: &Config) -> anyhow::Result<()> {
    let manager = RateLimitManager::with_storage(&config.rate_limits, InMemoryStorage::new(), Arc::new(SystemClock))?;
    let tiers = manager.tiers();

    for name in tiers.tier_names() {
        let limits: serde_json::Map<String, serde_json::Value> = TierWindow::ALL
            .iter()
            .map(|window| (window.to_string(), json!(tiers.get_limit(name, *window))))
            .collect();

        println!(
            "{}",
            json!({
                "default": name == tiers.default_tier(),
                "limits": limits,
                "tier": name,
                "unlimited": tiers.is_completely_unlimited(name),
            })
        );
    }

    Ok(())
}

fn validate(config: &Config) -> anyhow::Result<()> {
    for warning in config.validate()? {
        println!("warning: {warning}");
    }

    // Builds tiers and route policies without touching the configured storage.
    RateLimitManager::with_storage(&config.rate_limits, InMemoryStorage::new(), Arc::new(SystemClock))?;

    println!("configuration is valid");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use config::{FailureMode, RateLimitConfig, RedisConfig, StorageConfig, TierConfig};

    use super::*;

    fn unreachable_redis(failure_mode: FailureMode) -> Config {
        let storage = StorageConfig::Redis(Box::new(RedisConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            connection_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        }));

        let tier = TierConfig {
            requests_per_minute: Some(5),
            ..Default::default()
        };

        Config {
            rate_limits: RateLimitConfig {
                enabled: true,
                storage,
                failure_mode,
                tiers: [("anonymous".to_string(), tier)].into_iter().collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn attempt(flags: &[&str]) -> RequestArgs {
        let args = Args::try_parse_from(["quota", "attempt"].iter().chain(flags)).unwrap();

        let Command::Attempt(request) = args.command else {
            unreachable!("expected the attempt command");
        };

        request
    }

    #[tokio::test]
    async fn unreachable_storage_fails_open() {
        let config = unreachable_redis(FailureMode::Open);

        let decisions = decisions(&config, &attempt(&["--ip", "1.2.3.4", "-n", "2", "--cost", "3"]), true)
            .await
            .unwrap();

        assert_eq!(decisions.len(), 2);

        for decision in decisions {
            assert_eq!(decision["allowed"], json!(true));
            assert_eq!(decision["limit"], json!(null));
            assert_eq!(decision["cost"], json!(3));
        }
    }

    #[tokio::test]
    async fn unreachable_storage_fails_closed() {
        let config = unreachable_redis(FailureMode::Closed);

        let decisions = decisions(&config, &attempt(&["--ip", "1.2.3.4"]), true).await.unwrap();

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0]["allowed"], json!(false));
        assert_eq!(decisions[0]["retry_after"], json!(1));
        assert_eq!(decisions[0]["cost"], json!(1));
    }

    #[tokio::test]
    async fn unreachable_storage_is_irrelevant_when_disabled() {
        let mut config = unreachable_redis(FailureMode::Closed);
        config.rate_limits.enabled = false;

        let decisions = decisions(&config, &attempt(&[]), true).await.unwrap();

        assert_eq!(decisions[0]["allowed"], json!(true));
    }

    #[tokio::test]
    async fn unreachable_storage_resets_nothing() {
        let config = unreachable_redis(FailureMode::Closed);

        reset(&config, &attempt(&["--user", "alice"])).await.unwrap();
    }
}
