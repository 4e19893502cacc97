//! SpeedtestLog -- scheduled bandwidth tests and a ping watchdog for a home
//! connection.
//!
//! This crate provides the job scheduler, the single-test gate, the speed
//! test and watchdog runners, storage and the HTTP API around them.

pub mod api;
pub mod backup;
pub mod config;
pub mod daemon;
pub mod gate;
pub mod i18n;
pub mod notify;
pub mod process;
pub mod scheduler;
pub mod speedtest;
pub mod storage;
pub mod watchdog;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};

/// Stderr subscriber for the window before the configuration is known.
/// Scope it with [`tracing::subscriber::with_default`].
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Start the SpeedtestLog daemon: storage, scheduler, watchdog and API server.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.db_path.clone();
    tracing::info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    // 2. Wire components and restore persisted schedules
    let daemon = Arc::new(daemon::Daemon::new(config, pool)?);
    daemon.install_jobs()?;

    // 3. Start scheduler sweep, watchdog and server warmup (background tasks)
    daemon.spawn_background();

    // 4. Start API Server
    let addr: std::net::SocketAddr = daemon
        .config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", daemon.config.server.bind))?;
    let app = api::router(api::state::AppState::new(daemon));

    tracing::info!(%addr, "SpeedtestLog listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
