//! bookcast - Entry Point
//!
//! `serve` runs the replicator behind the socket server; `watch` follows
//! a single book and logs it.

use anyhow::Result;
use bookcast::config::{CONFIG_ENV, DEFAULT_CONFIG_PATH};
use bookcast::{AppConfig, Application};
use bookcast_core::Symbol;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Kraken order book replicator
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via BOOKCAST_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve books to socket clients (default)
    Serve,
    /// Follow one book and log it
    Watch {
        /// Venue pair, e.g. "XBT/USD"
        #[arg(short, long)]
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is made
    bookcast_ws::init_crypto();

    let args = Args::parse();

    // Determine config path: CLI arg > BOOKCAST_CONFIG env var > default
    let config = match args.config.or_else(|| std::env::var(CONFIG_ENV).ok()) {
        Some(path) => AppConfig::from_file(&path)?,
        None => AppConfig::load()?,
    };

    bookcast_telemetry::init_logging(&config.telemetry.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        default_config = DEFAULT_CONFIG_PATH,
        "Starting bookcast"
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        on_signal.cancel();
    });

    let app = Application::new(config)?;
    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => app.serve(shutdown).await?,
        Command::Watch { symbol } => {
            let symbol: Symbol = symbol.parse()?;
            app.watch(symbol, shutdown).await?
        }
    }

    info!("bookcast stopped");
    Ok(())
}
