//! Telemetry library for quota
//!
//! Provides OpenTelemetry metrics for rate limit decisions.

pub mod metrics;

use config::TelemetryConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Guard that ensures proper cleanup of telemetry resources
pub struct TelemetryGuard {
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Force flush all pending metrics immediately
    pub fn force_flush(&self) -> anyhow::Result<()> {
        self.meter_provider
            .force_flush()
            .map_err(|e| anyhow::anyhow!("Failed to flush metrics: {}", e))
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            log::error!("Failed to shutdown meter provider: {e}");
        }
    }
}

/// Initialize telemetry with the given configuration
///
/// Returns a guard that should be kept alive for the duration of the application.
/// Must be called from within a Tokio runtime when an exporter is enabled.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    let meter_provider = metrics::init_metrics(config)?;

    Ok(TelemetryGuard { meter_provider })
}
