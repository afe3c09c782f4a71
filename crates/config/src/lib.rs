//! Configuration structures mapping the quota.toml file.

#![deny(missing_docs)]

mod loader;
mod rate_limit;
mod telemetry;

use std::path::Path;

pub use rate_limit::*;
use serde::Deserialize;
pub use telemetry::{
    TelemetryConfig,
    exporters::{ExportersConfig, OtlpExporterConfig},
};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the configuration, returning warnings for suspicious but valid settings.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate_rate_limits(&self.rate_limits)
    }
}
