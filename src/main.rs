//! Asset Tracker Server - inventory and asset tracking
//!
//! Entry point. It handles:
//! - HTTP/JSON endpoints for items, catalogs, kits, documents and logs
//! - Spreadsheet import and export
//! - Invoice OCR through Gemini
//! - Background purge of soft-deleted items past their undo window

mod app;
mod config;
mod exchange;
mod http;
mod ocr;
mod session;
mod store;
mod util;

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::http::handlers::auth::bootstrap_admin;
use crate::store::Database;
use crate::util::media::{DOCUMENT_DIR, INVOICE_DIR};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Asset Tracker Server");
    info!("Server address: {}", config.server_addr);

    // Open the database and prepare the media directories
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    for dir in [DOCUMENT_DIR, INVOICE_DIR] {
        tokio::fs::create_dir_all(config.media_root.join(dir))
            .await
            .with_context(|| format!("creating media directory {}", dir))?;
    }

    // Create application state
    let addr: SocketAddr = config.server_addr;
    let state = AppState::new(config, db)
        .map_err(|e| anyhow::anyhow!("invalid SESSION_SECRET: {}", e))?;

    if let Err(e) = bootstrap_admin(&state).await {
        error!("Failed to create superuser: {}", e);
    }

    // Spawn the purge / session sweep
    tokio::spawn(state.clone().run_maintenance());

    // Build router
    let router = build_router(state);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
