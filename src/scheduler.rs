//! Scan lifecycle
//!
//! The scheduler is the only component that creates scan runs. A tenant has at
//! most one non-terminal run; the registry entry is created with an atomic
//! insert-if-absent, so a second trigger while a run is active returns the
//! active run's id.
//!
//! Each run is owned by one spawned task that walks
//! Pending → Collecting → Evaluating → Completed | PartiallyCompleted, or to
//! Failed. The run record sits behind a per-run mutex shared with
//! `cancel_run`: whoever takes the run to a terminal state first wins, and
//! the other side sees a terminal run and stops.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::collector::DataCollector;
use crate::db::{self, Database};
use crate::error::{PipelineError, Result};
use crate::models::{
    CollectionStatus, Finding, FindingSummary, ScanRun, ScanRunId, ScanState, ScanTrigger, Tenant,
};
use crate::notify::{NotificationSink, RunEvent};
use crate::rules::{RuleCatalog, RuleSet};
use crate::scanner::{ComplianceScanner, EvaluationSnapshot};

const INTERRUPTED_REASON: &str = "interrupted: process stopped before the run finished";
const CANCELLED_REASON: &str = "cancelled";

#[derive(Clone)]
struct ActiveRun {
    run_id: ScanRunId,
    cancelled: Arc<AtomicBool>,
    run: Arc<Mutex<ScanRun>>,
    state: Arc<watch::Sender<ScanState>>,
}

pub struct ScanScheduler {
    db: Arc<Database>,
    collector: Arc<DataCollector>,
    catalog: Arc<RuleCatalog>,
    sink: Arc<dyn NotificationSink>,
    /// Active run per tenant
    active: DashMap<String, ActiveRun>,
    watchers: DashMap<ScanRunId, watch::Receiver<ScanState>>,
}

impl ScanScheduler {
    pub fn new(
        db: Arc<Database>,
        collector: Arc<DataCollector>,
        catalog: Arc<RuleCatalog>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            db,
            collector,
            catalog,
            sink,
            active: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn collector(&self) -> &Arc<DataCollector> {
        &self.collector
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    /// Id of the tenant's non-terminal run, if any
    pub fn active_run(&self, tenant_id: &str) -> Option<ScanRunId> {
        self.active.get(tenant_id).map(|entry| entry.run_id)
    }

    /// Start a scan for a tenant, or return the id of the one already running
    ///
    /// # Errors
    /// `TenantNotFound` for an unregistered tenant, `InvariantViolation` when the
    /// tenant enables a rule the catalog does not know
    pub fn trigger_scan(self: &Arc<Self>, tenant_id: &str, trigger: ScanTrigger) -> Result<ScanRunId> {
        let tenant = self
            .db
            .with_conn(|conn| db::select_tenant(conn, tenant_id))?
            .ok_or_else(|| PipelineError::TenantNotFound(tenant_id.to_string()))?;
        let rules = self.catalog.resolve(&tenant.enabled_rules)?;

        let active = match self.active.entry(tenant.id.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    tenant = tenant_id,
                    run_id = %existing.get().run_id,
                    "scan already active, trigger is a no-op"
                );
                return Ok(existing.get().run_id);
            }
            Entry::Vacant(slot) => {
                let run = ScanRun::new(&tenant.id).with_trigger(trigger);
                self.db.with_conn(|conn| db::insert_scan_run(conn, &run))?;

                let (state_tx, state_rx) = watch::channel(run.state);
                let active = ActiveRun {
                    run_id: run.id,
                    cancelled: Arc::new(AtomicBool::new(false)),
                    run: Arc::new(Mutex::new(run)),
                    state: Arc::new(state_tx),
                };
                self.watchers.insert(active.run_id, state_rx);
                slot.insert(active.clone());
                active
            }
        };

        info!(
            tenant = tenant_id,
            run_id = %active.run_id,
            trigger = trigger.as_str(),
            rules = rules.len(),
            "scan run created"
        );

        let run_id = active.run_id;
        tokio::spawn(Arc::clone(self).execute(tenant, rules, active));
        Ok(run_id)
    }

    async fn execute(self: Arc<Self>, tenant: Tenant, rules: RuleSet, active: ActiveRun) {
        let finished_here = match self.run_pipeline(&tenant, &rules, &active).await {
            Ok(finished) => finished,
            Err(e) => {
                error!(tenant = %tenant.id, run_id = %active.run_id, "scan run aborted: {}", e);
                self.fail_active(&active, &e.to_string()).await
            }
        };

        if finished_here {
            let run = active.run.lock().await.clone();
            self.settle(&active, &run).await;
        }
    }

    /// Drive one run to a terminal state. Returns false when the run was
    /// already terminal (cancelled) at some phase boundary.
    async fn run_pipeline(&self, tenant: &Tenant, rules: &RuleSet, active: &ActiveRun) -> Result<bool> {
        if !self.advance(active, ScanState::Collecting).await? {
            return Ok(false);
        }

        let resource_types = rules.required_types();
        let collection = self
            .collector
            .collect(&tenant.id, &resource_types, Arc::clone(&active.cancelled))
            .await;
        let aggregate = collection.aggregate();

        let started_at = {
            let mut run = active.run.lock().await;
            if run.is_terminal() {
                return Ok(false);
            }

            let mut updated = run.clone();
            updated.outcomes = collection.per_type.clone();

            if aggregate == CollectionStatus::Failed {
                updated.fail("collection failed for every resource type")?;
                self.db
                    .with_conn(|conn| db::finalize_scan_run(conn, &updated, &[], false))?;
                *run = updated;
                return Ok(true);
            }

            updated.transition(ScanState::Evaluating)?;
            self.db.with_conn(|conn| db::update_scan_run(conn, &updated))?;
            let started_at = updated.started_at;
            *run = updated;
            started_at
        };
        active.state.send_replace(ScanState::Evaluating);

        let snapshot =
            EvaluationSnapshot::capture(self.collector.cache(), &tenant.id, started_at, &collection);
        let findings = ComplianceScanner::evaluate(active.run_id, &snapshot, rules);

        let next = if aggregate == CollectionStatus::Complete {
            ScanState::Completed
        } else {
            ScanState::PartiallyCompleted
        };
        self.complete(active, next, &findings).await
    }

    /// Persist findings and the terminal state, and publish the run as latest
    async fn complete(&self, active: &ActiveRun, next: ScanState, findings: &[Finding]) -> Result<bool> {
        let mut run = active.run.lock().await;
        if run.is_terminal() {
            debug!(run_id = %active.run_id, "run ended while evaluating, dropping findings");
            return Ok(false);
        }

        let mut finished = run.clone();
        finished.summary = FindingSummary::from_findings(findings);
        finished.transition(next)?;
        self.db
            .with_conn(|conn| db::finalize_scan_run(conn, &finished, findings, true))?;
        *run = finished;
        Ok(true)
    }

    async fn advance(&self, active: &ActiveRun, next: ScanState) -> Result<bool> {
        let mut run = active.run.lock().await;
        if run.is_terminal() {
            return Ok(false);
        }

        let mut updated = run.clone();
        updated.transition(next)?;
        self.db.with_conn(|conn| db::update_scan_run(conn, &updated))?;
        *run = updated;
        active.state.send_replace(next);
        Ok(true)
    }

    /// Force a non-terminal run to Failed. Returns true if this call did it.
    async fn fail_active(&self, active: &ActiveRun, reason: &str) -> bool {
        let mut run = active.run.lock().await;
        if run.is_terminal() {
            return false;
        }

        let mut failed = run.clone();
        if let Err(e) = failed.fail(reason) {
            error!(run_id = %active.run_id, "cannot fail run: {}", e);
            return false;
        }
        if let Err(e) = self
            .db
            .with_conn(|conn| db::finalize_scan_run(conn, &failed, &[], false))
        {
            error!(run_id = %active.run_id, "failed to persist failed run: {:#}", e);
        }
        *run = failed;
        true
    }

    /// Release the registry slot and announce the terminal run
    async fn settle(&self, active: &ActiveRun, run: &ScanRun) {
        self.active
            .remove_if(&run.tenant_id, |_, entry| entry.run_id == run.id);
        self.watchers.remove(&run.id);
        active.state.send_replace(run.state);
        self.sink.notify(RunEvent::from(run)).await;
    }

    /// Force a run to Failed from any non-terminal state
    ///
    /// # Errors
    /// `RunNotFound` for an unknown id, `InvariantViolation` for a run that is
    /// already terminal
    pub async fn cancel_run(&self, run_id: ScanRunId) -> Result<ScanRun> {
        let active = self
            .active
            .iter()
            .find(|entry| entry.value().run_id == run_id)
            .map(|entry| entry.value().clone());

        let Some(active) = active else {
            let run = self
                .db
                .with_conn(|conn| db::select_scan_run(conn, &run_id))?
                .ok_or(PipelineError::RunNotFound(run_id))?;
            return Err(PipelineError::InvariantViolation(format!(
                "scan run {} is not active (state {})",
                run_id,
                run.state.as_str()
            )));
        };

        active.cancelled.store(true, Ordering::SeqCst);

        let failed = {
            let mut run = active.run.lock().await;
            if run.is_terminal() {
                return Err(PipelineError::InvariantViolation(format!(
                    "scan run {} already {}",
                    run_id,
                    run.state.as_str()
                )));
            }
            let mut failed = run.clone();
            failed.fail(CANCELLED_REASON)?;
            self.db
                .with_conn(|conn| db::finalize_scan_run(conn, &failed, &[], false))?;
            *run = failed.clone();
            failed
        };

        warn!(tenant = %failed.tenant_id, run_id = %run_id, "scan run cancelled");
        self.settle(&active, &failed).await;
        Ok(failed)
    }

    /// Wait until a run reaches a terminal state
    pub async fn await_run(&self, run_id: ScanRunId) -> Result<ScanRun> {
        let watcher = self.watchers.get(&run_id).map(|rx| rx.value().clone());
        if let Some(mut rx) = watcher {
            // An error means the run settled and dropped its sender
            let _ = rx.wait_for(|state| state.is_terminal()).await;
        }

        self.db
            .with_conn(|conn| db::select_scan_run(conn, &run_id))?
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    pub fn get_run(&self, run_id: ScanRunId) -> Result<(ScanRun, Vec<Finding>)> {
        let (run, findings) = self.db.with_conn(|conn| {
            let run = db::select_scan_run(conn, &run_id)?;
            let findings = db::select_findings(conn, &run_id)?;
            Ok((run, findings))
        })?;
        let run = run.ok_or(PipelineError::RunNotFound(run_id))?;
        Ok((run, findings))
    }

    pub fn get_latest_run(&self, tenant_id: &str) -> Result<Option<ScanRun>> {
        Ok(self
            .db
            .with_conn(|conn| db::select_latest_run(conn, tenant_id))?)
    }

    /// Mark runs left non-terminal by a previous process as Failed and notify
    /// for each, since that process never did
    pub async fn recover(&self) -> Result<usize> {
        let stale_runs = self.db.with_conn(db::select_non_terminal_runs)?;
        let mut recovered = 0;

        for mut run in stale_runs {
            if self.active_run(&run.tenant_id) == Some(run.id) {
                continue;
            }
            run.fail(INTERRUPTED_REASON)?;
            self.db
                .with_conn(|conn| db::finalize_scan_run(conn, &run, &[], false))?;
            warn!(tenant = %run.tenant_id, run_id = %run.id, "recovered interrupted scan run");
            self.sink.notify(RunEvent::from(&run)).await;
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Trigger every tenant whose cadence has elapsed since its last run started
    pub fn trigger_due(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Vec<ScanRunId>> {
        let tenants = self.db.with_conn(db::select_tenants)?;
        let mut triggered = Vec::new();

        for tenant in tenants {
            if self.active.contains_key(&tenant.id) {
                continue;
            }
            let last_started = self
                .db
                .with_conn(|conn| db::select_last_run_started_at(conn, &tenant.id))?;
            if !tenant.is_due(last_started, now) {
                continue;
            }
            match self.trigger_scan(&tenant.id, ScanTrigger::Cadence) {
                Ok(run_id) => triggered.push(run_id),
                Err(e) => error!(tenant = %tenant.id, "cadence trigger failed: {}", e),
            }
        }

        Ok(triggered)
    }

    /// Cadence loop: checks due tenants every `tick` until `shutdown` flips to true
    pub async fn run_cadence(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_secs = tick.as_secs(), "cadence loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.trigger_due(Utc::now()) {
                        Ok(runs) if !runs.is_empty() => debug!(count = runs.len(), "cadence triggered scans"),
                        Ok(_) => {}
                        Err(e) => error!("cadence check failed: {}", e),
                    }
                    let pruned = self.collector.cache().evict_expired();
                    if pruned > 0 {
                        debug!(pruned, "pruned expired snapshots");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("cadence loop stopping");
                        break;
                    }
                }
            }
        }
    }
}
