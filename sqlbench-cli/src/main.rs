mod config;

use anyhow::Result;
use clap::Parser;
use config::{Cli, FileConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlbench::Runner;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_FILTER: &str = "sqlbench=info,sqlbench_cli=info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout only carries the report.
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let file = FileConfig::load(cli.config.as_deref())?;
    let config = config::resolve(&cli, &file)?;

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Serving metrics on {addr}");
    }

    let mut runner = Runner::new(config)?;
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current pass early");
            token.cancel();
        }
    });

    let results = runner.run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for measurement in &results {
            print!("{}", measurement.pretty());
        }
    }

    Ok(())
}
