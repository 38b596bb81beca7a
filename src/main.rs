use std::{net::SocketAddr, sync::Arc};

use fractic_iap_sync::{
    config::IapSyncConfig,
    http,
    storage::{plan_catalog_seed, Storage},
    util::IapSyncUtil,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = IapSyncConfig::from_env()?;
    info!(
        environment = ?config.environment,
        bundle_id = %config.bundle_id,
        mock_upstream = config.reconciliation.mock_upstream,
        "configuration loaded"
    );

    let storage = Storage::in_memory();
    if let Some(path) = &config.plan_catalog_path {
        plan_catalog_seed::seed_from_file(&storage, path).await?;
    }

    // Refuses to start without the trusted root certificate.
    let util = Arc::new(IapSyncUtil::new(&config, storage)?);
    tokio::spawn(util.reconciliation_task());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "server listening");
    axum::serve(listener, http::router(util))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
