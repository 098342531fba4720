//! promserve - serve the default metric registry for scraping
//!
//! Usage:
//!     promserve [--config <path>] [--port <port>]
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use promserve::config::{load_config, Config};
use promserve::util::init_logging;
use promserve::MetricServer;

/// Serve in-process metrics for a Prometheus-compatible scraper.
#[derive(Parser, Debug)]
#[command(name = "promserve")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the port to listen on
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load configuration from '{}'", path.display()))?,
        None => Config::default(),
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format);

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!(
            "  Endpoint: {}://{}:{}/{}",
            if config.server.use_https || config.server.tls.is_some() { "https" } else { "http" },
            config.server.hostname,
            config.server.port,
            config.server.path.trim_start_matches('/')
        );
        return Ok(());
    }

    run(config)
}

/// Run the metric server until Ctrl+C.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

async fn run_async(config: Config) -> Result<()> {
    let server = MetricServer::from_config(&config.server).context("failed to configure metric server")?;

    server
        .start(None)
        .await
        .with_context(|| format!("failed to start metric server on {}", server.bind_address()))?;

    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    server.stop().await;

    info!("promserve shut down complete");
    Ok(())
}
