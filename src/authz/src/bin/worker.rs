//! Tessera authorization worker
//!
//! Runs the compile, audit, stats and metrics subscribers until interrupted.
//!
//! Environment variables:
//! - `TESSERA_CONFIG` - configuration file path
//! - `RUST_LOG` - log filter (default: the configured `log.level`)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_authz::{AuthzConfig, AuthzRuntime, Repositories, SystemClock};
use tokio::signal;
use tracing::{info, warn};

/// Tessera authorization worker CLI
#[derive(Parser)]
#[command(name = "authz-worker")]
#[command(about = "Tessera authorization worker - policy compiler and decision pipeline")]
#[command(version)]
struct Cli {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AuthzConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => AuthzConfig::default(),
    };

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { config.log.level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(true)
        .with_line_number(true)
        .init();

    info!("Starting Tessera authorization worker v{}", env!("CARGO_PKG_VERSION"));
    config.validate().context("Invalid configuration")?;

    let repos = repositories(&config).await?;
    let runtime = AuthzRuntime::start(&config, repos, Arc::new(SystemClock))
        .context("Failed to start authorization runtime")?;

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received shutdown signal (Ctrl+C)"),
        _ = terminate_signal() => info!("Received shutdown signal (SIGTERM)"),
    }

    runtime.shutdown().await;
    info!("Worker stopped gracefully");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn repositories(config: &AuthzConfig) -> Result<Repositories> {
    use tessera_authz::store::PostgresIndexStore;

    let Some(url) = &config.database.url else {
        info!("No database configured, using the in-memory index");
        return Ok(Repositories::in_memory());
    };

    let store = PostgresIndexStore::new(url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.run_migrations().await.context("Failed to run migrations")?;
    info!("Flat index stored in PostgreSQL");

    Ok(Repositories::in_memory().with_index(Arc::new(store)))
}

#[cfg(not(feature = "postgres"))]
async fn repositories(config: &AuthzConfig) -> Result<Repositories> {
    if config.database.url.is_some() {
        warn!("database.url is set but the postgres feature is disabled, using the in-memory index");
    }
    Ok(Repositories::in_memory())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await
}
