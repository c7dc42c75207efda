use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shore_relay::cli::{self, Cli, Commands};
use shore_relay::RelayState;

#[tokio::main]
async fn main() {
    // Default to WARN when RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Some(Commands::Probe { url, user }) = &cli.command {
        match cli::run_probe(url.clone(), user.clone()).await {
            Ok(users) => {
                for user in users {
                    println!("{user}");
                }
            }
            Err(e) => {
                error!("probe failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let config = cli.relay_config();
    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };
    info!("starting shore relay on {}", addr);

    let listener = match shore_relay::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    };
    if let Err(e) = shore_relay::serve(listener, RelayState::in_memory(), shutdown).await {
        error!("relay stopped: {}", e);
        std::process::exit(1);
    }
}
