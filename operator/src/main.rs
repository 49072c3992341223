//! Operator is a long lived process that runs distributed Locust load tests.
#![deny(warnings)]
#![deny(missing_docs)]

use anyhow::Result;
use clap::Parser;
use locust_common::telemetry::{self, LogFormat};
use locust_operator::config::{ConfigArgs, OperatorConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// OTLP collector receiving the operator's traces.
    #[arg(long, env = "OPERATOR_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Format of the logs written to stdout.
    #[arg(long, env = "OPERATOR_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,

    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let meter_provider =
        telemetry::init("locust-operator", args.otlp_endpoint.clone(), args.log_format).await?;

    // Invalid settings abort startup instead of failing every reconcile.
    let config = OperatorConfig::try_from(args.config)?;
    info!(
        ?args.otlp_endpoint,
        affinity_injection = config.enable_affinity_injection,
        tolerations_injection = config.enable_tolerations_injection,
        kafka_security = config.kafka.security_enabled,
        "starting operator"
    );

    locust_operator::locusttest::controller::run(config).await?;

    // Flush traces and metrics before shutdown
    telemetry::shutdown(meter_provider)?;
    Ok(())
}
