//! dkf-dlv - Docket delivery service
//!
//! Stages media files, files them into numbered Work Picture deliveries,
//! splits them into prep folders and keeps the prep summary current.
//! HTTP REST + SSE on `--bind` (default 127.0.0.1:5730).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dkf_common::config::load_settings;
use dkf_common::events::EventBus;
use dkf_common::SettingsProvider;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dkf_dlv::AppState;

/// Command-line arguments for dkf-dlv
#[derive(Parser, Debug)]
#[command(name = "dkf-dlv")]
#[command(about = "Docket delivery and prep service")]
#[command(version)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long, env = "DKF_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:5730", env = "DKF_BIND")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Settings first: they carry the default log level
    let (settings, config_path) =
        load_settings(args.config.as_deref()).context("Failed to load settings")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting dkf-dlv {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Settings: {}", path.display()),
        None => info!("Settings: built-in defaults"),
    }
    settings
        .validate()
        .context("Settings are not usable")?;
    info!(
        "Server root: {}",
        settings.paths.server_base_path.display()
    );

    let event_bus = EventBus::new(256);
    let settings = Arc::new(SettingsProvider::new(settings));
    let state = AppState::new(settings, config_path, event_bus);
    let app = dkf_dlv::build_router(state);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", args.bind))?;
    info!("Listening on http://{}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
