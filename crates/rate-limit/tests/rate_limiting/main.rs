//! Integration tests for rate limiting.

#![allow(clippy::panic)]

mod contract;
mod manager;
mod redis;
mod scenario;

use std::sync::Arc;

use config::Config;
use rate_limit::{InMemoryStorage, RateLimitManager, clock::ManualClock};

/// 2023-11-14T22:13:20Z, a multiple of 60 plus 20 seconds.
pub const START: u64 = 1_700_000_000;

/// A manager built from a TOML configuration, over in-memory storage with a frozen clock.
pub fn manager(config: &str) -> (RateLimitManager<InMemoryStorage>, Arc<ManualClock>) {
    let config: Config = toml::from_str(config).unwrap();

    let clock = Arc::new(ManualClock::from_secs(START));
    let storage = InMemoryStorage::with_clock(clock.clone());
    let manager = RateLimitManager::with_storage(&config.rate_limits, storage, clock.clone()).unwrap();

    (manager, clock)
}
