//! nanocrud - JSON document collections over HTTP, versioned in git
//!
//! Every collection is a datafile in the data directory, which is also a git
//! work tree. Changes are staged as they happen; `SIGUSR1` (or the configured
//! interval) commits a snapshot of every open collection.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use libnanocrud_core::load_config;
use nanocrud::{Engine, SnapshotTrigger};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "nanocrud", about = "Versioned JSON collections over HTTP", version)]
struct Cli {
    /// Config file (JSON, or TOML with a .toml extension)
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long)]
    log_level: Option<String>,

    /// Listen port; overrides the config
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if cli.log_level.is_some() {
        config.log_level = cli.log_level;
    }
    if cli.port.is_some() {
        config.port = cli.port;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("nanocrud starting");

    let port = config.port();
    let engine = match Engine::start(config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let router = match engine.router() {
        Ok(router) => router,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind port {}: {}", port, e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Serving {} on port {}",
        engine.data_dir().display(),
        port
    );

    spawn_signal_trigger(engine.trigger());

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    let mut code = ExitCode::SUCCESS;
    if let Err(e) = served {
        error!("Server error: {}", e);
        code = ExitCode::FAILURE;
    }

    if let Err(e) = engine.shutdown().await {
        error!("Final snapshot failed: {}", e);
        code = ExitCode::FAILURE;
    }

    info!("nanocrud stopped");
    code
}

/// Fire a snapshot on every SIGUSR1
#[cfg(unix)]
fn spawn_signal_trigger(trigger: SnapshotTrigger) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGUSR1 handler, snapshots are interval-only: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            info!("Received SIGUSR1, requesting snapshot");
            trigger.fire();
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_trigger(_trigger: SnapshotTrigger) {
    warn!("Signal triggers are unavailable on this platform");
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
}
