//! branchlined - Branchline HTTP service

use std::sync::Arc;

use anyhow::{Context, Result};
use branchline_core::{init_tracing, Branchline, StagingArea};
use branchline_store::{GithubStore, JsonFileAuditLog};
use branchlined::{router, AppState, Config};
use clap::Parser;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(config.json, level);

    let store = GithubStore::from_env().context("configuring GitHub object store")?;
    info!(
        owner = %store.config().owner,
        repo = %store.config().repo,
        "object store configured"
    );

    let core = Branchline::new(
        Arc::new(store),
        Arc::new(JsonFileAuditLog::new(&config.audit_log)),
        config.stage_branches(),
    );
    let state = AppState::new(core, StagingArea::new(&config.upload_dir));
    let app = router(state, config.max_upload_bytes());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, upload_dir = %config.upload_dir.display(), "branchlined listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("branchlined stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}
