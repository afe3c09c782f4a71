//! Metrics initialization and management

mod names;
mod recorder;

pub use names::*;
pub use recorder::Recorder;

use anyhow::Context;
use config::TelemetryConfig;
use opentelemetry::metrics::Meter;
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};

const METER_NAME: &str = "quota";

/// Get the global meter for recording metrics
pub fn meter() -> Meter {
    opentelemetry::global::meter(METER_NAME)
}

pub(crate) fn init_metrics(config: &TelemetryConfig) -> anyhow::Result<SdkMeterProvider> {
    let meter_provider = create_otlp_meter_provider(config)?;

    opentelemetry::global::set_meter_provider(meter_provider.clone());

    log::info!(
        "Telemetry metrics initialized for service '{}'",
        config.service_name().unwrap_or(METER_NAME)
    );

    Ok(meter_provider)
}

fn create_otlp_meter_provider(telemetry_config: &TelemetryConfig) -> anyhow::Result<SdkMeterProvider> {
    let Some(exporter_config) = telemetry_config.metrics_otlp_config() else {
        log::debug!("No metrics exporter enabled, metrics will not be exported");
        return Ok(SdkMeterProvider::builder().build());
    };

    log::debug!("Initializing OTLP metrics exporter to {}", exporter_config.endpoint);

    let mut builder = Resource::builder();

    if let Some(service_name) = telemetry_config.service_name() {
        builder = builder.with_service_name(service_name.to_string());
    }

    for (key, value) in telemetry_config.resource_attributes() {
        use opentelemetry::{Key, KeyValue, Value};
        builder = builder.with_attribute(KeyValue::new(Key::from(key.clone()), Value::from(value.clone())));
    }

    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(exporter_config.endpoint.as_str())
        .with_timeout(exporter_config.timeout)
        .build()
        .context("Failed to create gRPC OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(exporter_config.export_interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(builder.build())
        .with_reader(reader)
        .build();

    log::info!("OTLP metrics exporter initialized to {}", exporter_config.endpoint);

    Ok(provider)
}
