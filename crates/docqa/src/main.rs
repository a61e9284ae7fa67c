//! Worker-node entry point: wires the services from configuration and
//! drains the task queue until interrupted. HTTP serving lives in a
//! separate frontend; this binary only runs the pipeline side.

use clap::Parser;
use docqa::core::config::AppConfig;
use docqa::Services;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "docqa", about = "Document QA ingestion worker", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "DOCQA_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = if cli.config.exists() {
        AppConfig::load_from_path(&cli.config).await?
    } else {
        info!(
            "no config file at {}, using defaults",
            cli.config.display()
        );
        AppConfig::default()
    };

    let services = Services::build(config).await?;
    services.start_workers().await;
    info!("worker node running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    services.shutdown().await?;

    Ok(())
}
