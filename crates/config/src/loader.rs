use std::path::Path;

use anyhow::{Context, bail};
use indoc::formatdoc;

use crate::{Config, RateLimitConfig};

pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

    let warnings = validate_rate_limits(&config.rate_limits)?;

    for warning in warnings {
        log::warn!("{warning}");
    }

    Ok(config)
}

/// Validates the rate limit configuration and returns warnings.
pub(crate) fn validate_rate_limits(config: &RateLimitConfig) -> anyhow::Result<Vec<String>> {
    let mut warnings = Vec::new();

    if !config.tiers.is_empty() && !config.tiers.contains_key(&config.default_tier) {
        let known = config.tiers.keys().map(String::as_str).collect::<Vec<_>>().join(", ");

        bail!(formatdoc! {r#"
            The default tier '{}' is not defined. Known tiers: {known}.
            Either add a [rate_limits.tiers.{}] section or point default_tier at an existing tier.
        "#, config.default_tier, config.default_tier});
    }

    for (name, route) in &config.routes {
        if route.cost == 0 {
            bail!("Route '{name}' has a cost of 0, the cost must be at least 1");
        }

        for limit in &route.limits {
            if limit.attempts == 0 {
                bail!("Route '{name}' has a limit with 0 attempts, attempts must be at least 1");
            }

            if limit.decay_seconds == 0 {
                bail!("Route '{name}' has a limit with a decay of 0 seconds, the decay must be at least 1 second");
            }
        }

        if route.limits.is_empty() && !route.tier_limits {
            warnings.push(format!(
                "Route '{name}' disables tier limits and defines no limits of its own, it will never be rate limited"
            ));
        }
    }

    if config.enabled && config.tiers.is_empty() && config.routes.is_empty() {
        warnings.push("Rate limiting is enabled but no tiers or routes are configured".to_string());
    }

    Ok(warnings)
}
