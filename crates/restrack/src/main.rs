//! `restrack-server`: serves the tracking commands over HTTP.
//!
//! ```bash
//! restrack-server --config /etc/restrack.yaml
//! restrack-server --listen 0.0.0.0:5001
//! ```

use clap::Parser;
use restrack::config::ServerConfig;
use restrack::telemetry::setup_tracing;
use restrack::{ServiceError, TrackerService};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "restrack-server", version, about = "Resource allocation tracking service")]
struct Cli {
    /// YAML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "RESTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured listen address.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path).await?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    setup_tracing(&config.log);

    let service = TrackerService::start(&config).await?;
    info!(url = %service.url(), "Ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    service.shutdown().await
}
