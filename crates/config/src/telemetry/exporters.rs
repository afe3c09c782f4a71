use duration_str::deserialize_duration;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Exporters configuration for telemetry
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ExportersConfig {
    /// OTLP exporter configuration
    pub otlp: OtlpExporterConfig,
}

impl ExportersConfig {
    /// Get the OTLP exporter configuration
    pub fn otlp(&self) -> &OtlpExporterConfig {
        &self.otlp
    }
}

/// OTLP exporter configuration, exported over gRPC
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpExporterConfig {
    /// Whether this exporter is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,

    /// Request timeout
    #[serde(deserialize_with = "deserialize_duration", default = "default_timeout")]
    pub timeout: Duration,

    /// Delay between periodic metric exports
    #[serde(deserialize_with = "deserialize_duration", default = "default_export_interval")]
    pub export_interval: Duration,
}

impl Default for OtlpExporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            timeout: default_timeout(),
            export_interval: default_export_interval(),
        }
    }
}

fn default_endpoint() -> Url {
    Url::parse("http://localhost:4317").expect("default URL should be valid")
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_export_interval() -> Duration {
    Duration::from_secs(5)
}
