//! Built-in compliance rules
//!
//! A rule covers every resource of its subject type and decides pass/fail from
//! the resource payload, optionally consulting other collected types through
//! `RuleContext`. Rules never see collection failures; the scanner turns those
//! into unknown verdicts before a rule is asked.

pub mod adm_privileged_roles;
pub mod ca1_conditional_access;
pub mod id1_guest_accounts;
pub mod mfa1_enforcement;
pub mod sp1_external_sharing;

pub use adm_privileged_roles::{ADM1GlobalAdminCountRule, ADM2PrivilegedMfaRule};
pub use ca1_conditional_access::CA1ConditionalAccessRule;
pub use id1_guest_accounts::ID1GuestAccountsRule;
pub use mfa1_enforcement::MFA1EnforcementRule;
pub use sp1_external_sharing::SP1ExternalSharingRule;

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::models::ResourceType;
use crate::scanner::{EvaluationSnapshot, SnapshotResource};

/// Result of one rule predicate on one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass(String),
    Fail(String),
    /// The payload lacks what the predicate needs
    Unknown(String),
}

/// Read access to the rest of the captured snapshot
pub struct RuleContext<'a> {
    snapshot: &'a EvaluationSnapshot,
}

impl<'a> RuleContext<'a> {
    pub fn new(snapshot: &'a EvaluationSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn resources(&self, resource_type: ResourceType) -> &'a [SnapshotResource] {
        self.snapshot.resources(resource_type)
    }
}

pub trait ComplianceRule: Send + Sync {
    fn id(&self) -> &'static str;

    fn title(&self) -> &'static str;

    /// Type whose resources this rule produces findings for
    fn subject_type(&self) -> ResourceType;

    /// Every type the predicate reads, subject type included
    fn required_types(&self) -> Vec<ResourceType> {
        vec![self.subject_type()]
    }

    fn evaluate(&self, subject: &Value, ctx: &RuleContext<'_>) -> RuleOutcome;
}

/// The rules shipped with the crate
pub struct RuleCatalog {
    rules: Vec<Arc<dyn ComplianceRule>>,
}

impl RuleCatalog {
    pub fn builtin() -> Self {
        let rules: Vec<Arc<dyn ComplianceRule>> = vec![
            Arc::new(ID1GuestAccountsRule),
            Arc::new(CA1ConditionalAccessRule),
            Arc::new(MFA1EnforcementRule),
            Arc::new(SP1ExternalSharingRule),
            Arc::new(ADM1GlobalAdminCountRule),
            Arc::new(ADM2PrivilegedMfaRule),
        ];
        Self { rules }
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.id()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ComplianceRule>> {
        self.rules.iter().find(|rule| rule.id() == id).cloned()
    }

    /// Rule set for a tenant's enabled rule ids. No ids means every rule.
    ///
    /// # Errors
    /// `InvariantViolation` naming the first id absent from the catalog
    pub fn resolve(&self, ids: &[String]) -> Result<RuleSet, PipelineError> {
        if ids.is_empty() {
            return Ok(RuleSet::new(self.rules.clone()));
        }

        let mut rules = Vec::with_capacity(ids.len());
        for id in ids {
            let rule = self
                .get(id)
                .ok_or_else(|| PipelineError::InvariantViolation(format!("unknown rule id: {}", id)))?;
            if !rules.iter().any(|r: &Arc<dyn ComplianceRule>| r.id() == rule.id()) {
                rules.push(rule);
            }
        }
        Ok(RuleSet::new(rules))
    }
}

/// Rules applied in one scan, ordered by id
#[derive(Clone)]
pub struct RuleSet {
    rules: Vec<Arc<dyn ComplianceRule>>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<Arc<dyn ComplianceRule>>) -> Self {
        rules.sort_by(|a, b| a.id().cmp(b.id()));
        Self { rules }
    }

    pub fn rules(&self) -> &[Arc<dyn ComplianceRule>] {
        &self.rules
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Union of the types every rule reads, in a stable order
    pub fn required_types(&self) -> Vec<ResourceType> {
        self.rules
            .iter()
            .flat_map(|rule| rule.required_types())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(crate) fn bool_field(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

/// String array field; non-string elements are ignored
pub(crate) fn str_list(value: &Value, key: &str) -> Option<Vec<String>> {
    value.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}
