//! Ledgerboot Daemon - ledger bootstrap service
//!
//! On start the daemon enrolls with the certificate authority, waits for the
//! customers chaincode, checks its version and provisions any owners missing
//! from the ledger. A small HTTP surface exposes progress and accepts new
//! settings.

use clap::Parser;
use ledgerboot_daemon::error::{DaemonError, DaemonResult};
use ledgerboot_daemon::{DaemonConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ledgerboot Daemon CLI
#[derive(Parser)]
#[command(name = "ledgerbootd")]
#[command(about = "Ledgerboot Daemon - ledger bootstrap service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LEDGERBOOT_CONFIG")]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, env = "LEDGERBOOT_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "LEDGERBOOT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "LEDGERBOOT_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Print startup banner
    println!(
        r#"
  _          _                 _                 _
 | | ___  __| | __ _  ___ _ __| |__   ___   ___ | |_
 | |/ _ \/ _` |/ _` |/ _ \ '__| '_ \ / _ \ / _ \| __|
 | |  __/ (_| | (_| |  __/ |  | |_) | (_) | (_) | |_
 |_|\___|\__,_|\__, |\___|_|  |_.__/ \___/ \___/ \__|
               |___/

  Ledger bootstrap service
  Version: {}
  Company: {}
  Channel: {}
  Listening: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.bootstrap.company,
        config.bootstrap.channel_id,
        config.server.listen_addr
    );

    // Create and run server
    let server = Server::new(config)?;
    server.run().await
}
