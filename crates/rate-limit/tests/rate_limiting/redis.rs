//! Tests against a local Redis server, run with `cargo test -- --ignored`.

use std::sync::Arc;

use config::RedisConfig;
use rate_limit::{
    Algorithm, LimitDefinition, PartitionBy, RateLimitManager, RedisStorage, StorageBackend, TierManager,
    clock::SystemClock,
};

use crate::contract::storage_contract;

fn redis_config() -> RedisConfig {
    RedisConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
        key_prefix: Some(format!("quota-test-{:016x}:", rand::random::<u64>())),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "Needs a Redis server on localhost:6379 or REDIS_URL"]
async fn redis_storage_contract() {
    let storage = RedisStorage::new(&redis_config()).await.unwrap();

    storage_contract(&storage, "contract:").await;
}

#[tokio::test]
#[ignore = "Needs a Redis server on localhost:6379 or REDIS_URL"]
async fn sliding_window_over_redis() {
    let storage = StorageBackend::from(RedisStorage::new(&redis_config()).await.unwrap());
    let tiers = TierManager::new(&Default::default(), "anonymous").unwrap();
    let manager = RateLimitManager::new(tiers, storage, Arc::new(SystemClock));

    let limit = LimitDefinition::new(3, 60, Algorithm::Sliding, PartitionBy::Ip).unwrap();

    let mut decisions = Vec::new();

    for _ in 0..4 {
        decisions.push(manager.attempt("ip:1.2.3.4", &[limit], 1).await.unwrap().allowed);
    }

    assert_eq!(decisions, vec![true, true, true, false]);

    manager.reset("ip:1.2.3.4").await;

    assert!(manager.attempt("ip:1.2.3.4", &[limit], 1).await.unwrap().allowed);

    manager.reset("ip:1.2.3.4").await;
}

#[tokio::test]
async fn unreachable_redis_is_a_storage_error() {
    let config = RedisConfig {
        url: "redis://127.0.0.1:1/0".to_string(),
        connection_timeout: Some(std::time::Duration::from_secs(2)),
        ..Default::default()
    };

    let error = RedisStorage::new(&config).await.err().unwrap();

    assert!(
        matches!(
            error,
            rate_limit::StorageError::Connection(_) | rate_limit::StorageError::Timeout(_)
        ),
        "unexpected error: {error}"
    );
}
