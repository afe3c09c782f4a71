//! Behavior every storage backend has to share.

use rate_limit::{
    InMemoryStorage, RateLimitStorage, StorageError,
    storage::{ScoreBound, TTL_MISSING, TTL_NO_EXPIRY},
};

/// Runs the storage contract against `storage`, using keys under `prefix`.
pub async fn storage_contract<S: RateLimitStorage>(storage: &S, prefix: &str) {
    let counter = format!("{prefix}counter");
    let set = format!("{prefix}set");
    let missing = format!("{prefix}missing");

    // counters
    assert_eq!(storage.increment(&counter, 3).await.unwrap(), 3);
    assert_eq!(storage.increment(&counter, 2).await.unwrap(), 5);
    assert_eq!(storage.decrement(&counter, 1).await.unwrap(), 4);
    assert_eq!(storage.get(&counter).await.unwrap().as_deref(), Some("4"));

    // expiry
    assert_eq!(storage.ttl(&counter).await.unwrap(), TTL_NO_EXPIRY);
    assert!(storage.expire(&counter, 60).await.unwrap());
    assert!((1..=60).contains(&storage.ttl(&counter).await.unwrap()));
    assert!(!storage.expire(&missing, 60).await.unwrap());

    // missing keys
    assert_eq!(storage.get(&missing).await.unwrap(), None);
    assert_eq!(storage.ttl(&missing).await.unwrap(), TTL_MISSING);
    assert!(!storage.exists(&missing).await.unwrap());
    assert_eq!(storage.zcard(&missing).await.unwrap(), 0);
    assert!(storage.zrange(&missing, 0, -1).await.unwrap().is_empty());
    assert!(!storage.delete(&missing).await.unwrap());

    // sorted sets
    let members: Vec<(String, f64)> = [("a", 1000.0), ("b", 2000.0), ("c", 3000.0), ("d", 4000.0)]
        .iter()
        .map(|(member, score)| (member.to_string(), *score))
        .collect();

    assert!(storage.zadd(&set, &members).await.unwrap());
    assert_eq!(storage.zcard(&set).await.unwrap(), 4);
    assert_eq!(storage.zrange(&set, 0, 0).await.unwrap(), vec!["a"]);
    assert_eq!(storage.zrange(&set, -2, -1).await.unwrap(), vec!["c", "d"]);
    assert_eq!(storage.zrange(&set, 1, 100).await.unwrap(), vec!["b", "c", "d"]);

    let removed = storage
        .zremrangebyscore(&set, ScoreBound::NegInfinity, ScoreBound::Exclusive(2000.0))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(storage.zrange(&set, 0, -1).await.unwrap(), vec!["b", "c", "d"]);

    let removed = storage
        .zremrangebyscore(&set, ScoreBound::Inclusive(3000.0), ScoreBound::PosInfinity)
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert_eq!(storage.zcard(&set).await.unwrap(), 1);

    // type mismatches
    let error = storage.increment(&set, 1).await.unwrap_err();
    assert!(matches!(error, StorageError::WrongType { .. }), "unexpected error: {error}");

    // deletion is idempotent
    assert!(storage.delete(&counter).await.unwrap());
    assert!(!storage.delete(&counter).await.unwrap());
    assert!(storage.delete(&set).await.unwrap());
    assert!(!storage.exists(&set).await.unwrap());
}

#[tokio::test]
async fn memory_storage_contract() {
    storage_contract(&InMemoryStorage::new(), "").await;
}
