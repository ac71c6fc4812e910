//! Exchange simulator server.
//!
//! `server [--config <path>]` — runs until ctrl-c; exits non-zero when the
//! configured address cannot be bound.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use faultline::{Config, ExchangeServer};

#[derive(Debug, Parser)]
#[command(name = "server", about = "Crypto-exchange simulator server")]
struct Args {
    /// Path to a JSON configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    info!(
        symbols = ?config.exchange.symbols,
        tick_interval = config.exchange.tick_interval,
        failures = config.failures.enabled,
        "starting exchange simulator"
    );

    let server = ExchangeServer::new(config)?;
    let addr = server.start().await?;
    info!(%addr, "ready — streaming at /ws, request API at /api/v1");

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    server.stop().await;
    Ok(())
}
