//! Radio relay server binary

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use radio_relay::{RadioServer, RelayConfig, ServerConfig};

/// Live radio relay with concurrent recording
#[derive(Parser)]
#[command(name = "radio-relay")]
#[command(about = "Relay internet radio to WebSocket clients and record streams", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Directory recordings are written to
    #[arg(short, long, default_value = "recordings")]
    recordings_dir: PathBuf,

    /// Chunks a listener may fall behind before it is dropped
    #[arg(long, default_value_t = 256)]
    broadcast_capacity: usize,

    /// Upstream connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = match cli.verbose {
        0 => "radio_relay=info",
        1 => "radio_relay=debug",
        _ => "radio_relay=trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::with_addr(cli.bind)
        .recordings_dir(&cli.recordings_dir)
        .relay(
            RelayConfig::default()
                .broadcast_capacity(cli.broadcast_capacity)
                .connect_timeout(Duration::from_secs(cli.connect_timeout)),
        );

    let server = RadioServer::new(config).context("Failed to create server")?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
        .with_context(|| format!("Server on {} failed", cli.bind))?;

    Ok(())
}
