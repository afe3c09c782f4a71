//! Named tiers mapped to per-window request limits.

use std::{collections::BTreeMap, fmt};

use config::{Algorithm, PartitionBy, TierConfig};

use crate::{error::RateLimitError, limit::LimitDefinition};

/// The canonical windows a tier can limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TierWindow {
    /// 60 seconds.
    Minute,
    /// 3600 seconds.
    Hour,
    /// 86400 seconds.
    Day,
}

impl TierWindow {
    /// All windows, shortest first.
    pub const ALL: [TierWindow; 3] = [TierWindow::Minute, TierWindow::Hour, TierWindow::Day];

    /// Length of the window in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            TierWindow::Minute => 60,
            TierWindow::Hour => 3600,
            TierWindow::Day => 86_400,
        }
    }

    /// Name of the window.
    pub fn as_str(&self) -> &'static str {
        match self {
            TierWindow::Minute => "minute",
            TierWindow::Hour => "hour",
            TierWindow::Day => "day",
        }
    }
}

impl fmt::Display for TierWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-window limits of a tier. `None` or zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierLimits {
    /// Requests per minute.
    pub per_minute: Option<u32>,
    /// Requests per hour.
    pub per_hour: Option<u32>,
    /// Requests per day.
    pub per_day: Option<u32>,
}

impl TierLimits {
    /// The limit for a window, `None` when that window is unlimited.
    pub fn get(&self, window: TierWindow) -> Option<u32> {
        let limit = match window {
            TierWindow::Minute => self.per_minute,
            TierWindow::Hour => self.per_hour,
            TierWindow::Day => self.per_day,
        };

        limit.filter(|limit| *limit > 0)
    }
}

impl From<&TierConfig> for TierLimits {
    fn from(config: &TierConfig) -> Self {
        Self {
            per_minute: config.requests_per_minute,
            per_hour: config.requests_per_hour,
            per_day: config.requests_per_day,
        }
    }
}

static NO_LIMITS: TierLimits = TierLimits {
    per_minute: None,
    per_hour: None,
    per_day: None,
};

/// Resolves tier names to their limits.
///
/// Unknown tiers resolve to the default tier. Without any tiers configured every tier is unlimited.
#[derive(Debug, Clone)]
pub struct TierManager {
    tiers: BTreeMap<String, TierLimits>,
    default_tier: String,
}

impl TierManager {
    /// Build the manager, failing when tiers are configured but the default tier is not one of them.
    pub fn new(tiers: &BTreeMap<String, TierConfig>, default_tier: impl Into<String>) -> Result<Self, RateLimitError> {
        let default_tier = default_tier.into();

        if !tiers.is_empty() && !tiers.contains_key(&default_tier) {
            return Err(RateLimitError::UnknownDefaultTier(default_tier));
        }

        let tiers = tiers
            .iter()
            .map(|(name, config)| (name.clone(), TierLimits::from(config)))
            .collect();

        Ok(Self { tiers, default_tier })
    }

    /// Name of the default tier.
    pub fn default_tier(&self) -> &str {
        &self.default_tier
    }

    /// Names of all configured tiers.
    pub fn tier_names(&self) -> impl Iterator<Item = &str> {
        self.tiers.keys().map(String::as_str)
    }

    /// The tier actually used for `tier`: itself when configured, the default tier otherwise.
    pub fn resolve<'a>(&'a self, tier: &'a str) -> &'a str {
        if self.tiers.contains_key(tier) {
            tier
        } else {
            &self.default_tier
        }
    }

    /// The limits of `tier`, falling back to the default tier.
    pub fn get_limits(&self, tier: &str) -> &TierLimits {
        self.tiers
            .get(tier)
            .or_else(|| self.tiers.get(&self.default_tier))
            .unwrap_or(&NO_LIMITS)
    }

    /// The limit of `tier` for one window, `None` when unlimited.
    pub fn get_limit(&self, tier: &str, window: TierWindow) -> Option<u32> {
        self.get_limits(tier).get(window)
    }

    /// Whether `tier` has no limit for `window`.
    pub fn is_unlimited(&self, tier: &str, window: TierWindow) -> bool {
        self.get_limit(tier, window).is_none()
    }

    /// Whether `tier` has no limit for any window.
    pub fn is_completely_unlimited(&self, tier: &str) -> bool {
        TierWindow::ALL.iter().all(|window| self.is_unlimited(tier, *window))
    }

    /// One sliding window definition partitioned by client IP for every limited window of `tier`.
    pub fn create_default_limits(&self, tier: &str) -> Vec<LimitDefinition> {
        let limits = self.get_limits(tier);

        TierWindow::ALL
            .iter()
            .filter_map(|window| {
                let attempts = limits.get(*window)?;
                LimitDefinition::new(attempts, window.seconds(), Algorithm::Sliding, PartitionBy::Ip).ok()
            })
            .collect()
    }
}
