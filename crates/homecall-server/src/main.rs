use std::time::Duration;

use clap::Parser;
use homecall::{Telemetry, common::Config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "homecalld", about = "Operator metrics exporter (Prometheus pull and Kafka push)")]
struct Cli {
    /// Overrides METRICS_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides METRICS_PUBLISH_INTERVAL, in seconds.
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Serve /metrics only, without publishing to Kafka.
    #[arg(long, default_value_t = false)]
    no_push: bool,

    #[arg(long, default_value_t = false)]
    no_pod_counts: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(port) = self.port {
            config.metrics_port = port;
        }
        if let Some(secs) = self.interval_secs {
            if secs == 0 {
                return Err("--interval-secs must be greater than zero".into());
            }
            config.publish_interval = Duration::from_secs(secs);
        }
        if self.no_pod_counts {
            config.pod_counts_enabled = false;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env().add_directive("homecall=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    cli.apply(&mut config)?;
    info!(
        namespace = %config.namespace,
        cluster = %config.cluster,
        resource_kind = %config.resource_kind,
        controller = %config.controller_name,
        controller_version = %config.controller_version,
        "homecall configuration loaded"
    );

    let telemetry = Telemetry::new(config);
    telemetry.start_pull().await?;

    if cli.no_push {
        info!("kafka metrics disabled by --no-push");
    } else if let Err(err) = telemetry.start_push().await {
        warn!(error = %err, "kafka metrics disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    telemetry.shutdown().await;

    Ok(())
}
