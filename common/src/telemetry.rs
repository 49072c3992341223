//! Provides helper functions for initializing telemetry collection and publication.
use std::time::Duration;

use anyhow::Result;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::MeterProvider as SdkMeterProvider, runtime, trace, Resource};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Layer, Registry};

/// Output format of the log layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Single line, human readable logs.
    #[default]
    Compact,
    /// Newline delimited JSON logs.
    Json,
}

/// Initialize tracing and metrics.
///
/// Logs are always written to stdout. When an OTLP endpoint is given spans and
/// metrics are also exported to that collector, and the returned meter provider
/// must be passed to [`shutdown`].
pub async fn init(
    service_name: &'static str,
    otlp_endpoint: Option<String>,
    format: LogFormat,
) -> Result<Option<SdkMeterProvider>> {
    // Default to INFO if no env is specified
    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let logger = match format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .compact()
            .with_filter(log_filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(log_filter)
            .boxed(),
    };

    let meter_provider = otlp_endpoint
        .as_deref()
        .map(|endpoint| meter_provider(service_name, endpoint))
        .transpose()?;

    let telemetry = match otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(trace::config().with_resource(resource(service_name)))
                .install_batch(runtime::Tokio)?;
            let otlp_filter = EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?;
            Some(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(otlp_filter),
            )
        }
        None => None,
    };

    let collector = Registry::default().with(telemetry).with(logger);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector)?;

    Ok(meter_provider)
}

/// Flush pending metrics and spans to the collector.
pub fn shutdown(meter_provider: Option<SdkMeterProvider>) -> Result<()> {
    global::shutdown_tracer_provider();
    if let Some(provider) = meter_provider {
        provider.shutdown()?;
    }
    Ok(())
}

/// Build a periodic OTLP metrics pipeline and install it as the global meter provider.
fn meter_provider(service_name: &'static str, endpoint: &str) -> Result<SdkMeterProvider> {
    let provider = opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_resource(resource(service_name))
        .with_period(Duration::from_secs(10))
        .build()?;
    global::set_meter_provider(provider.clone());
    Ok(provider)
}

fn resource(service_name: &'static str) -> Resource {
    Resource::new(vec![
        KeyValue::new("hostname", hostname()),
        KeyValue::new("service.name", service_name),
    ])
}

fn hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_owned())
}
