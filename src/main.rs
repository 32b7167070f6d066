//! AutoAudit daemon
//!
//! Recovers runs interrupted by a previous process, registers the configured
//! tenant, then runs the cadence loop until Ctrl-C.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use autoaudit::commands::{self, AppState};
use autoaudit::notify::TracingSink;
use autoaudit::utils::{init_tracing, load_env};
use autoaudit::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env()?;
    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    let state = AppState::from_config(config, Arc::new(TracingSink))
        .context("Failed to initialize pipeline")?;

    let recovered = state.scheduler.recover().await?;
    if recovered > 0 {
        warn!(recovered, "marked interrupted scan runs as failed");
    }

    if let Some(tenant_id) = state.config.tenant_id.clone() {
        let registered = commands::list_tenants(&state)
            .await?
            .iter()
            .any(|tenant| tenant.id == tenant_id);
        if !registered {
            commands::register_tenant(&state, &tenant_id, &tenant_id, None, Vec::new()).await?;
        }
    }

    let health = commands::health(&state).await;
    info!(status = ?health.status, "startup health check");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cadence = tokio::spawn(
        Arc::clone(&state.scheduler).run_cadence(state.config.scheduler_tick, shutdown_rx),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");

    // Receiver may already be gone if the loop exited on its own
    let _ = shutdown_tx.send(true);
    cadence.await.context("Cadence loop panicked")?;

    Ok(())
}
