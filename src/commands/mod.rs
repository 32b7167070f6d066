//! Command interface
//!
//! Entry points collaborators call into the pipeline. Every command takes the
//! shared `AppState` and surfaces failures as `PipelineError`.
//!
//! Scan Commands (6):
//! - trigger_scan: Start an on-demand scan (no-op if one is active)
//! - get_run: Scan run with its findings
//! - get_latest_run: Most recent Completed/PartiallyCompleted run
//! - list_runs: Recent runs of a tenant
//! - cancel_run: Force an active run to Failed
//! - get_report: Compliance report of a run
//!
//! Tenant Commands (3):
//! - register_tenant, update_tenant_schedule, list_tenants
//!
//! Cache Commands (3):
//! - cache_stats, clear_cache, prune_cache
//!
//! Health (1):
//! - health: Database and Microsoft Graph component status

use anyhow::Context;
use std::sync::Arc;

use crate::cache::ResultCache;
use crate::collector::DataCollector;
use crate::config::PipelineConfig;
use crate::db::Database;
use crate::graph::{DirectoryApi, GraphClient, RateLimitedClient, StaticTokenProvider};
use crate::notify::NotificationSink;
use crate::rate_limiter::RateLimiter;
use crate::rules::RuleCatalog;
use crate::scheduler::ScanScheduler;

pub mod cache;
pub mod health;
pub mod scan;
pub mod tenant;

pub use cache::{cache_stats, clear_cache, prune_cache};
pub use health::{health, ComponentHealth, ComponentStatus, HealthReport};
pub use scan::{cancel_run, get_latest_run, get_report, get_run, list_runs, trigger_scan, RunDetails};
pub use tenant::{list_tenants, register_tenant, update_tenant_schedule};

/// Shared handles behind every command
pub struct AppState {
    pub config: PipelineConfig,
    pub db: Arc<Database>,
    pub cache: Arc<ResultCache>,
    pub scheduler: Arc<ScanScheduler>,
}

impl AppState {
    /// Wire the pipeline around an arbitrary directory API
    pub fn new(
        config: PipelineConfig,
        db: Arc<Database>,
        api: Arc<dyn DirectoryApi>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::with_config(config.rate_limit.clone()));
        let client = Arc::new(RateLimitedClient::new(
            api,
            limiter,
            config.retry.clone(),
            config.call_timeout,
        ));
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let collector = Arc::new(DataCollector::new(
            client,
            Arc::clone(&cache),
            config.max_workers,
        ));
        let scheduler = Arc::new(ScanScheduler::new(
            Arc::clone(&db),
            collector,
            Arc::new(RuleCatalog::builtin()),
            sink,
        ));

        Self {
            config,
            db,
            cache,
            scheduler,
        }
    }

    /// Open the database under the configured data directory and talk to Graph
    pub fn from_config(config: PipelineConfig, sink: Arc<dyn NotificationSink>) -> anyhow::Result<Self> {
        let db = Arc::new(Database::open_in(&config.data_dir)?);

        let credentials = match &config.access_token {
            Some(token) => StaticTokenProvider::new(token)?,
            None => {
                tracing::warn!("GRAPH_ACCESS_TOKEN not set, directory calls will be rejected");
                StaticTokenProvider::default()
            }
        };
        let api = GraphClient::new(&config.graph, Arc::new(credentials))
            .context("Failed to build Microsoft Graph client")?;

        Ok(Self::new(config, db, Arc::new(api), sink))
    }
}
