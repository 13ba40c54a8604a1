//! Startup helpers for the chat log server.

use std::process::ExitCode;
use std::sync::Arc;

use crate::common::config::ServerConfig;
use crate::common::errors::ChatLogResult;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C (used by the `chatlog-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting chat log service v{}", env!("CARGO_PKG_VERSION"));

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if the database cannot be opened.
pub async fn initialize(config: ServerConfig) -> ChatLogResult<Arc<AppState>> {
    AppState::new(config).await
}

async fn serve(config: ServerConfig) -> ChatLogResult<()> {
    let state = initialize(config).await?;
    server::run_server_with_shutdown(state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
