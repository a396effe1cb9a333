//! Tapedeck server - HTTP control daemon for robotic LTO tape libraries.
//!
//! Loads the library description from `~/.tapedeck/config.ini` (or the
//! `--config` path), builds the control engine and serves the `/library`
//! API until interrupted. On ctrl-c every full drive is unmounted and
//! unloaded before the process exits.

mod routes;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tapedeck::config::ConfigFile;
use tapedeck::engine::Engine;
use tapedeck::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tapedeck-server")]
#[command(version = tapedeck::VERSION)]
#[command(about = "HTTP control daemon for robotic LTO tape libraries", long_about = None)]
struct Cli {
    /// Path to config.ini (defaults to ~/.tapedeck/config.ini)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configured value
    #[arg(long)]
    listen: Option<String>,

    /// Directory for log files
    #[arg(long, default_value = logging::DEFAULT_LOG_DIR)]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _log_guard = match logging::init(&cli.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: failed to initialize logging: {err}");
            process::exit(1);
        }
    };

    let config = match &cli.config {
        Some(path) => ConfigFile::load_from(path),
        None => ConfigFile::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!("cannot load configuration: {err}");
            process::exit(1);
        }
    };
    if config.drives.is_empty() {
        error!("no [drive:N] sections configured; the library would be useless");
        process::exit(1);
    }

    let listen = cli.listen.unwrap_or_else(|| config.library.listen.clone());
    let addr: SocketAddr = match listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid listen address '{listen}': {err}");
            process::exit(1);
        }
    };

    let engine = Engine::with_defaults(&config);
    info!(
        version = tapedeck::VERSION,
        drives = config.drives.len(),
        %addr,
        "tapedeck server starting"
    );

    let app = routes::router(Arc::clone(&engine));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("cannot bind {addr}: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(engine))
        .await
    {
        error!("server error: {err}");
        process::exit(1);
    }
    info!("tapedeck server stopped");
}

/// Wait for ctrl-c, then park every cartridge before letting the server
/// finish in-flight requests.
async fn shutdown(engine: Arc<Engine>) {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("cannot listen for the shutdown signal");
        return;
    }
    info!("shutdown requested; releasing all drives");
    let operation = engine.release_and_wait().await;
    info!(status = %operation.status, "release finished: {}", operation.message);
}
