use anyhow::Context;
use castle_server::config::{ServerConfig, DEFAULT_PORT};
use castle_server::network::Server;
use castle_server::persistence::{Persistence, SledStore};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable overriding where the sled store lives.
const DATA_DIR_VAR: &str = "CASTLE_DATA_DIR";

/// Main-method of the application.
/// Parses the port, opens the store, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Port to listen on
        #[clap(default_value_t = DEFAULT_PORT)]
        port: u16,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServerConfig {
        port: args.port,
        ..ServerConfig::default()
    };
    if let Some(dir) = std::env::var_os(DATA_DIR_VAR) {
        config.data_dir = PathBuf::from(dir);
    }

    // A store that cannot be opened leaves the server running unsaved
    let (persistence, worker) = match SledStore::open(&config.data_dir) {
        Ok(store) => {
            let (persistence, worker) = Persistence::start(Arc::new(store));
            (persistence, Some(worker))
        }
        Err(e) => {
            warn!(
                "Could not open store at {}: {}; progress will not be saved",
                config.data_dir.display(),
                e
            );
            (Persistence::disabled(), None)
        }
    };

    let server = Server::bind(config, persistence)
        .await
        .context("failed to start server")?;
    let handle = server.handle();
    let mut server_task = tokio::spawn(server.run());

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut server_task => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
            if let Err(e) = server_task.await {
                error!("Server task panicked: {}", e);
            }
        }
    }

    // The worker exits once every persistence sender is dropped
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            error!("Persistence worker panicked: {}", e);
        }
    }

    Ok(())
}
