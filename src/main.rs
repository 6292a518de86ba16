use std::sync::Arc;

use anyhow::{Context, Result};
use parrot_core::config::AppConfig;
use parrot_core::server::{router, AppState};
use parrot_core::telemetry::init_tracing;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("invalid environment configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let bind = config.bind_addr();
    let state = Arc::new(AppState::from_config(config).context("failed to initialise store")?);
    info!(target: "http", store = state.store_kind(), "parrot facade configured");

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(target: "http", %bind, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server terminated")?;
    info!(target: "http", "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: "http", %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
