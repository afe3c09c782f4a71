use std::{sync::Arc, time::Duration};

use indoc::indoc;
use rate_limit::{Algorithm, LimitDefinition, PartitionBy, RateLimitStorage};

use crate::{START, manager};

const TIERS: &str = indoc! {r#"
    [rate_limits]
    enabled = true
    default_tier = "anonymous"

    [rate_limits.tiers.anonymous]
    requests_per_minute = 10
    requests_per_hour = 100

    [rate_limits.tiers.free]
    requests_per_minute = 5
    requests_per_hour = 100
    requests_per_day = 1000

    [rate_limits.tiers.enterprise]
"#};

#[test]
fn unknown_tier_gets_the_default_limits() {
    let (manager, _) = manager(TIERS);
    let tiers = manager.tiers();

    assert_eq!(tiers.get_limits("nonexistent"), tiers.get_limits("anonymous"));
    assert_eq!(
        tiers.create_default_limits("nonexistent"),
        tiers.create_default_limits("anonymous")
    );
}

#[test]
fn tier_without_windows_is_unlimited() {
    let (manager, _) = manager(TIERS);
    let tiers = manager.tiers();

    assert!(tiers.is_completely_unlimited("enterprise"));
    assert!(tiers.create_default_limits("enterprise").is_empty());
    assert!(!tiers.is_completely_unlimited("free"));
    assert_eq!(tiers.create_default_limits("free").len(), 3);
}

#[tokio::test]
async fn folding_charges_every_definition_once() {
    let (manager, _) = manager(TIERS);

    let strict = LimitDefinition::new(1, 60, Algorithm::Fixed, PartitionBy::User).unwrap();
    let loose = LimitDefinition::new(10, 60, Algorithm::Fixed, PartitionBy::User).unwrap();

    // use up the strict limit on its own
    assert!(manager.attempt("user:alice", &[strict], 1).await.unwrap().allowed);

    let result = manager.attempt("user:alice", &[loose, strict], 1).await.unwrap();

    assert!(!result.allowed);
    assert_eq!(result.limit, 1);
    assert_eq!(result.remaining, 0);
    // the strict window ends at the next minute boundary
    assert_eq!(result.retry_after, Some(40));
    assert_eq!(result.reset_at, START + 40);

    let bucket = START / 60;
    let storage = manager.storage();

    let strict_count = storage.get(&format!("user:alice:user:1:60:fixed:{bucket}")).await.unwrap();
    let loose_count = storage.get(&format!("user:alice:user:10:60:fixed:{bucket}")).await.unwrap();

    assert_eq!(strict_count.as_deref(), Some("2"));
    assert_eq!(loose_count.as_deref(), Some("1"));
}

#[tokio::test]
async fn longest_denial_wins() {
    let (manager, _) = manager(TIERS);

    let minute = LimitDefinition::new(1, 60, Algorithm::Sliding, PartitionBy::Ip).unwrap();
    let hour = LimitDefinition::new(1, 3600, Algorithm::Sliding, PartitionBy::Ip).unwrap();

    manager.attempt("ip:1.2.3.4", &[minute, hour], 1).await.unwrap();
    let result = manager.attempt("ip:1.2.3.4", &[minute, hour], 1).await.unwrap();

    assert!(!result.allowed);
    assert_eq!(result.retry_after, Some(3600));
    assert_eq!(result.reset_at, START + 3600);
}

#[tokio::test]
async fn reset_twice_leaves_nothing_behind() {
    let (manager, _) = manager(TIERS);
    let (limits, cost) = manager.limits_for("free", None);

    for _ in 0..6 {
        manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap();
    }

    assert!(!manager.storage().is_empty());

    manager.reset("ip:1.2.3.4").await;
    assert!(manager.storage().is_empty());

    manager.reset("ip:1.2.3.4").await;
    assert!(manager.storage().is_empty());

    let result = manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap();
    assert!(result.allowed);
    assert_eq!(result.remaining, 4);
}

#[tokio::test]
async fn identities_are_isolated() {
    let (manager, _) = manager(TIERS);
    let (limits, cost) = manager.limits_for("free", None);

    for _ in 0..5 {
        manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap();
    }

    assert!(!manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap().allowed);
    assert!(manager.attempt("ip:5.6.7.8", &limits, cost).await.unwrap().allowed);
}

#[tokio::test]
async fn minute_limit_recovers_while_day_limit_accumulates() {
    let (manager, clock) = manager(TIERS);
    let (limits, cost) = manager.limits_for("free", None);

    for _ in 0..5 {
        assert!(manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap().allowed);
    }

    assert!(!manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap().allowed);

    clock.advance(Duration::from_secs(61));

    let result = manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap();
    assert!(result.allowed);
    assert_eq!(result.limit, 5);
    assert_eq!(result.remaining, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attempts_respect_every_limit() {
    let (manager, _) = manager(TIERS);
    let manager = Arc::new(manager);
    let (limits, cost) = manager.limits_for("free", None);
    let limits = Arc::new(limits);

    let mut handles = Vec::new();

    for _ in 0..40 {
        let manager = manager.clone();
        let limits = limits.clone();

        handles.push(tokio::spawn(async move {
            manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap().allowed
        }));
    }

    let mut allowed = 0;

    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }

    assert_eq!(allowed, 5);
}

#[tokio::test]
async fn longest_windows_are_evaluated_without_overflow() {
    let (manager, _) = manager(TIERS);

    for (algorithm, window) in [
        (Algorithm::Fixed, u64::MAX),
        (Algorithm::Sliding, u64::MAX / 1000 + 1),
        (Algorithm::TokenBucket, u64::MAX / 2 + 1),
    ] {
        let limit = LimitDefinition::new(5, window, algorithm, PartitionBy::Ip).unwrap();

        let result = manager.attempt("ip:1.2.3.4", &[limit], 1).await.unwrap();

        assert!(result.allowed, "{algorithm:?}");
        assert_eq!(result.remaining, 4, "{algorithm:?}");
    }
}
