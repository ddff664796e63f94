//! CLI for Pollbus
//!
//! Loads `.env` and configuration, starts the idle-group sweeper and serves
//! the HTTP API until Ctrl-C.

use std::sync::Arc;

use clap::Parser;
use pollbus::broker::Broker;
use pollbus::config::{DEFAULT_CONFIG_PATH, Settings, load_config_from};
use pollbus::transport::HttpServer;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pollbus", about = "In-memory topic broker with long-poll consumers")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// Override the listen host
    #[arg(long)]
    host: Option<String>,
    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match load_config_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            pollbus::utils::logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    pollbus::utils::logging::init(&config.logging.level);

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if let Err(e) = run_server(config).await {
        error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Arc::new(Broker::new(config.broker.clone()));
    let server = HttpServer::new(config.server.clone(), Arc::clone(&broker));

    let outcome: Result<(), Box<dyn std::error::Error>> = async {
        broker.start()?;
        tokio::select! {
            result = server.start() => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
            }
        }
        Ok(())
    }
    .await;

    broker.shutdown();
    outcome
}
