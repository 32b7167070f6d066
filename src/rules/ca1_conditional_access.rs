//! CA.1: Conditional Access policies are enforced
//!
//! A policy left disabled or in report-only mode does not protect sign-ins.

use serde_json::Value;

use super::{str_field, ComplianceRule, RuleContext, RuleOutcome};
use crate::models::ResourceType;

pub struct CA1ConditionalAccessRule;

impl ComplianceRule for CA1ConditionalAccessRule {
    fn id(&self) -> &'static str {
        "CA.1"
    }

    fn title(&self) -> &'static str {
        "Conditional Access policies are enabled"
    }

    fn subject_type(&self) -> ResourceType {
        ResourceType::ConditionalAccessPolicies
    }

    fn evaluate(&self, subject: &Value, _ctx: &RuleContext<'_>) -> RuleOutcome {
        let name = str_field(subject, "displayName").unwrap_or("(unnamed policy)");
        match str_field(subject, "state") {
            Some("enabled") => RuleOutcome::Pass(format!("policy '{}' is enabled", name)),
            Some(state) => RuleOutcome::Fail(format!("policy '{}' is in state '{}'", name, state)),
            None => RuleOutcome::Unknown(format!("policy '{}' has no state", name)),
        }
    }
}
