//! Compliance reports
//!
//! A report is a read-only view over one scan run and its findings. Entries are
//! ordered by rule id then resource id so two reports of the same run are
//! byte-identical.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::FailureKind;
use crate::models::{
    CollectionStatus, Finding, FindingSummary, ResourceType, ScanRun, ScanRunId, ScanState,
    ScanTrigger, UnknownReason, Verdict,
};
use crate::rules::RuleCatalog;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectionEntry {
    pub resource_type: ResourceType,
    pub status: CollectionStatus,
    pub pages_fetched: u32,
    pub items_fetched: u32,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RuleEntry {
    pub rule_id: String,
    pub title: Option<String>,
    pub pass: u32,
    pub fail: u32,
    pub unknown: u32,
    /// Findings evaluated on stale data
    pub stale: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceEntry {
    pub rule_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub detail: String,
    pub stale: bool,
    /// Only set for unknown verdicts
    pub reason: Option<UnknownReason>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComplianceReport {
    pub run_id: ScanRunId,
    pub tenant_id: String,
    pub state: ScanState,
    pub triggered_by: ScanTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub summary: FindingSummary,
    pub stale_findings: u32,
    pub collection: Vec<CollectionEntry>,
    pub rules: Vec<RuleEntry>,
    pub failures: Vec<ResourceEntry>,
    pub unknowns: Vec<ResourceEntry>,
}

impl ComplianceReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Resource types whose collection did not complete
    pub fn incomplete_types(&self) -> Vec<ResourceType> {
        self.collection
            .iter()
            .filter(|entry| entry.status != CollectionStatus::Complete)
            .map(|entry| entry.resource_type)
            .collect()
    }
}

pub struct ReportGenerator<'a> {
    catalog: &'a RuleCatalog,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(catalog: &'a RuleCatalog) -> Self {
        Self { catalog }
    }

    pub fn generate(&self, run: &ScanRun, findings: &[Finding]) -> ComplianceReport {
        let collection = run
            .outcomes
            .iter()
            .map(|(&resource_type, outcome)| CollectionEntry {
                resource_type,
                status: outcome.status,
                pages_fetched: outcome.pages_fetched,
                items_fetched: outcome.items_fetched,
                failure: outcome.failure,
                error: outcome.error.clone(),
            })
            .collect();

        let mut rules: BTreeMap<&str, RuleEntry> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut unknowns = Vec::new();
        let mut stale_findings = 0;

        for finding in findings {
            let entry = rules
                .entry(finding.rule_id.as_str())
                .or_insert_with(|| RuleEntry {
                    rule_id: finding.rule_id.clone(),
                    title: self
                        .catalog
                        .get(&finding.rule_id)
                        .map(|rule| rule.title().to_string()),
                    ..RuleEntry::default()
                });

            if finding.evidence.stale {
                entry.stale += 1;
                stale_findings += 1;
            }

            match finding.verdict {
                Verdict::Pass => entry.pass += 1,
                Verdict::Fail => {
                    entry.fail += 1;
                    failures.push(resource_entry(finding, None));
                }
                Verdict::Unknown => {
                    entry.unknown += 1;
                    let reason = finding
                        .evidence
                        .unknown_reason
                        .unwrap_or(UnknownReason::MissingData);
                    unknowns.push(resource_entry(finding, Some(reason)));
                }
            }
        }

        failures.sort_by(|a, b| (&a.rule_id, &a.resource_id).cmp(&(&b.rule_id, &b.resource_id)));
        unknowns.sort_by(|a, b| (&a.rule_id, &a.resource_id).cmp(&(&b.rule_id, &b.resource_id)));

        ComplianceReport {
            run_id: run.id,
            tenant_id: run.tenant_id.clone(),
            state: run.state,
            triggered_by: run.triggered_by,
            started_at: run.started_at,
            completed_at: run.completed_at,
            failure_reason: run.failure_reason.clone(),
            summary: FindingSummary::from_findings(findings),
            stale_findings,
            collection,
            rules: rules.into_values().collect(),
            failures,
            unknowns,
        }
    }
}

fn resource_entry(finding: &Finding, reason: Option<UnknownReason>) -> ResourceEntry {
    ResourceEntry {
        rule_id: finding.rule_id.clone(),
        resource_type: finding.resource_type,
        resource_id: finding.resource_id.clone(),
        detail: finding.evidence.detail.clone(),
        stale: finding.evidence.stale,
        reason,
    }
}
