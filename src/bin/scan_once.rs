use anyhow::Context;
use std::sync::Arc;

use autoaudit::commands::{self, AppState};
use autoaudit::notify::TracingSink;
use autoaudit::utils::{get_and_validate_access_token, init_tracing, load_env};
use autoaudit::PipelineConfig;

// Run one scan for a tenant and print its compliance report as JSON.
// Usage: cargo run --bin scan_once -- [tenant_id]
// The tenant defaults to AZURE_TENANT_ID and is registered on first use.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env()?;
    let mut config = PipelineConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    config.access_token = Some(get_and_validate_access_token()?);

    let tenant_id = std::env::args()
        .nth(1)
        .or_else(|| config.tenant_id.clone())
        .context("usage: scan_once <tenant_id> (or set AZURE_TENANT_ID)")?;

    let state = AppState::from_config(config, Arc::new(TracingSink))?;
    state.scheduler.recover().await?;

    let known = commands::list_tenants(&state)
        .await?
        .iter()
        .any(|tenant| tenant.id == tenant_id);
    if !known {
        commands::register_tenant(&state, &tenant_id, &tenant_id, None, Vec::new()).await?;
    }

    let run_id = commands::trigger_scan(&state, &tenant_id).await?;
    state.scheduler.await_run(run_id).await?;

    let report = commands::get_report(&state, run_id).await?;
    println!("{}", report.to_json()?);

    Ok(())
}
