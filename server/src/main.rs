use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, DEFAULT_STEP_HISTORY};
use server::network::Server;
use shared::{DEFAULT_PORT, RESEND_THRESHOLD_MS, RETRY_TICK_MS};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Milliseconds to wait for an acknowledgement before resending
    #[arg(long, default_value_t = RESEND_THRESHOLD_MS)]
    resend_ms: u64,

    /// Milliseconds between retransmission scans
    #[arg(long, default_value_t = RETRY_TICK_MS)]
    tick_ms: u64,

    /// Number of recent steps to keep (0 keeps every step)
    #[arg(long, default_value_t = DEFAULT_STEP_HISTORY)]
    step_history: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            resend_threshold: Duration::from_millis(args.resend_ms),
            retry_tick: Duration::from_millis(args.tick_ms),
            step_history: (args.step_history > 0).then_some(args.step_history),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ServerConfig::from(Args::parse());
    info!(
        "Resend threshold {:?}, retry tick {:?}",
        config.resend_threshold, config.retry_tick
    );

    let mut server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
