//! askfiles-server - HTTP API for asking questions about uploaded files
//!
//! Uses XDG Base Directory specification for file locations:
//! - Activation table: $XDG_DATA_HOME/askfiles/file-statuses.json
//! - Logs: $XDG_STATE_HOME/askfiles/askfiles.log (~/.local/state/askfiles/askfiles.log)
//! - Config: $XDG_CONFIG_HOME/askfiles/config.toml (~/.config/askfiles/config.toml)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use askfiles::{build_router, AppState};
use askfiles_core::{ActivationStore, Config, ServiceRegistry};
use clap::Parser;

#[derive(Parser)]
#[command(name = "askfiles-server")]
#[command(about = "Serve the askfiles HTTP API")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/askfiles/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides server.host)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides server.port and $PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Don't mirror logs to stderr
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port.or_else(port_from_env) {
        config.server.port = port;
    }
    config.logging.stderr = !args.quiet;

    let _log_guard =
        askfiles_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let activation = Arc::new(ActivationStore::open(config.activation.resolved_path()));
    let api_key = config.gemini.resolved_api_key();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let registry = Arc::new(ServiceRegistry::gemini(config, activation));

    match api_key {
        Some(key) => match registry.apply(&key) {
            Ok(_) => tracing::info!("API key loaded from configuration"),
            Err(e) => tracing::warn!(error = %e, "Configured API key rejected"),
        },
        None => tracing::warn!(
            "No Gemini API key configured; set GEMINI_API_KEY or POST /api/config/test-key"
        ),
    }

    let app = build_router(AppState::new(registry));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(addr = %addr, "askfiles-server listening");
    println!("askfiles-server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("askfiles-server stopped");
    Ok(())
}

fn port_from_env() -> Option<u16> {
    std::env::var("PORT").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
