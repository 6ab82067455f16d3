//! portrelay-server - in-cluster relay dispatcher
//!
//! Listens for tunnel-side connections and relays each request to its
//! destination.

use anyhow::Result;
use clap::Parser;
use portrelay::server::{Dispatcher, DEFAULT_CONNECT_TIMEOUT, SERVER_PORT};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// In-cluster dispatcher for the portrelay port-forwarding relay
#[derive(Parser, Debug)]
#[command(name = "portrelay-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Timeout in seconds for connecting to upstream
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;

    info!("portrelay-server v{}", portrelay::VERSION);

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    let dispatcher = Dispatcher::new(Duration::from_secs(args.connect_timeout));

    tokio::select! {
        res = dispatcher.run(listener) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
            Ok(())
        }
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
