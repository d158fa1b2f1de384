//! Runs the bank scenario and prints what it left behind.

use demo::config::{DemoConfig, LogFormat};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use unit_of_work::DomainEventBus;

#[tokio::main]
async fn main() {
    let config = DemoConfig::from_env();

    // 1. Initialize tracing
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Run the scenario
    tracing::info!(
        accounts = config.accounts,
        transfers = config.transfers,
        "starting bank scenario"
    );
    let summary = match demo::run(&config, DomainEventBus::new()).await {
        Ok(summary) => summary,
        Err(error) => {
            tracing::error!(%error, "scenario failed");
            std::process::exit(1);
        }
    };

    println!("{summary}");
    println!();
    println!("{}", metrics_handle.render());
}
