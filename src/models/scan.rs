use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{FailureKind, FetchError, PipelineError};
use crate::models::{Finding, ResourceType, Verdict};

pub type ScanRunId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "collecting")]
    Collecting,
    #[serde(rename = "evaluating")]
    Evaluating,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "partially_completed")]
    PartiallyCompleted,
    #[serde(rename = "failed")]
    Failed,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Pending => "pending",
            ScanState::Collecting => "collecting",
            ScanState::Evaluating => "evaluating",
            ScanState::Completed => "completed",
            ScanState::PartiallyCompleted => "partially_completed",
            ScanState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanState::Pending),
            "collecting" => Some(ScanState::Collecting),
            "evaluating" => Some(ScanState::Evaluating),
            "completed" => Some(ScanState::Completed),
            "partially_completed" => Some(ScanState::PartiallyCompleted),
            "failed" => Some(ScanState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::PartiallyCompleted | ScanState::Failed
        )
    }

    /// Legal forward transitions. Failed is reachable from every non-terminal state.
    pub fn can_transition_to(&self, next: ScanState) -> bool {
        use ScanState::*;
        match (self, next) {
            (Pending, Collecting) => true,
            (Collecting, Evaluating) => true,
            (Evaluating, Completed) | (Evaluating, PartiallyCompleted) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// What started a scan run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanTrigger {
    OnDemand,
    Cadence,
}

impl ScanTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTrigger::OnDemand => "on_demand",
            ScanTrigger::Cadence => "cadence",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "on_demand" => Some(ScanTrigger::OnDemand),
            "cadence" => Some(ScanTrigger::Cadence),
            _ => None,
        }
    }
}

/// Collection outcome for one resource type, or the aggregate over all types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Complete,
    Partial,
    Failed,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Complete => "complete",
            CollectionStatus::Partial => "partial",
            CollectionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeOutcome {
    pub status: CollectionStatus,
    pub pages_fetched: u32,
    pub items_fetched: u32,
    /// Kind of the failure that ended collection of this type
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
}

impl TypeOutcome {
    pub fn complete(pages_fetched: u32, items_fetched: u32) -> Self {
        Self {
            status: CollectionStatus::Complete,
            pages_fetched,
            items_fetched,
            failure: None,
            error: None,
        }
    }

    /// Outcome of a type whose pagination stopped on `error`
    pub fn interrupted(pages_fetched: u32, items_fetched: u32, error: &FetchError) -> Self {
        let status = if pages_fetched == 0 {
            CollectionStatus::Failed
        } else {
            CollectionStatus::Partial
        };
        Self {
            status,
            pages_fetched,
            items_fetched,
            failure: Some(error.kind()),
            error: Some(error.to_string()),
        }
    }

    /// Outcome of a type whose pagination was stopped by cancellation
    pub fn cancelled(pages_fetched: u32, items_fetched: u32) -> Self {
        let status = if pages_fetched == 0 {
            CollectionStatus::Failed
        } else {
            CollectionStatus::Partial
        };
        Self {
            status,
            pages_fetched,
            items_fetched,
            failure: None,
            error: Some("collection cancelled".to_string()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CollectionStatus::Complete
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindingSummary {
    pub total: u32,
    pub pass: u32,
    pub fail: u32,
    pub unknown: u32,
}

impl FindingSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        findings.iter().fold(Self::default(), |mut summary, finding| {
            summary.total += 1;
            match finding.verdict {
                Verdict::Pass => summary.pass += 1,
                Verdict::Fail => summary.fail += 1,
                Verdict::Unknown => summary.unknown += 1,
            }
            summary
        })
    }
}

/// One execution of the collect/evaluate pipeline for a tenant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRun {
    pub id: ScanRunId,
    pub tenant_id: String,
    pub state: ScanState,
    pub triggered_by: ScanTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcomes: BTreeMap<ResourceType, TypeOutcome>,
    pub failure_reason: Option<String>,
    pub summary: FindingSummary,
}

impl ScanRun {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            state: ScanState::Pending,
            triggered_by: ScanTrigger::OnDemand,
            started_at: Utc::now(),
            completed_at: None,
            outcomes: BTreeMap::new(),
            failure_reason: None,
            summary: FindingSummary::default(),
        }
    }

    pub fn with_trigger(mut self, trigger: ScanTrigger) -> Self {
        self.triggered_by = trigger;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`, stamping `completed_at` on terminal states
    pub fn transition(&mut self, next: ScanState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvariantViolation(format!(
                "scan run {} cannot move from {} to {}",
                self.id,
                self.state.as_str(),
                next.as_str()
            )));
        }
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), PipelineError> {
        self.transition(ScanState::Failed)?;
        self.failure_reason = Some(reason.to_string());
        Ok(())
    }
}
