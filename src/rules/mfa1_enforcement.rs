//! MFA.1: Multi-factor authentication is enabled and enforced tenant-wide
//!
//! Reads the authentication methods policy: `enabled`, `enforced` and the
//! `excludedUsers` list. Any exclusion is a gap in enforcement.

use serde_json::Value;

use super::{bool_field, str_list, ComplianceRule, RuleContext, RuleOutcome};
use crate::models::ResourceType;

pub struct MFA1EnforcementRule;

impl ComplianceRule for MFA1EnforcementRule {
    fn id(&self) -> &'static str {
        "MFA.1"
    }

    fn title(&self) -> &'static str {
        "MFA enforced for all users"
    }

    fn subject_type(&self) -> ResourceType {
        ResourceType::AuthenticationMethodsPolicy
    }

    fn evaluate(&self, subject: &Value, _ctx: &RuleContext<'_>) -> RuleOutcome {
        let (Some(enabled), Some(enforced)) =
            (bool_field(subject, "enabled"), bool_field(subject, "enforced"))
        else {
            return RuleOutcome::Unknown("policy lacks enabled/enforced flags".to_string());
        };

        if !enabled {
            return RuleOutcome::Fail("MFA is disabled".to_string());
        }
        if !enforced {
            return RuleOutcome::Fail("MFA is enabled but not enforced".to_string());
        }

        let excluded = str_list(subject, "excludedUsers").unwrap_or_default();
        if excluded.is_empty() {
            RuleOutcome::Pass("MFA enabled and enforced with no exclusions".to_string())
        } else {
            RuleOutcome::Fail(format!("{} user(s) excluded from MFA", excluded.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::EvaluationSnapshot;
    use serde_json::json;

    fn evaluate(subject: Value) -> RuleOutcome {
        let snapshot = EvaluationSnapshot::empty("contoso");
        MFA1EnforcementRule.evaluate(&subject, &RuleContext::new(&snapshot))
    }

    #[test]
    fn test_enforced_without_exclusions_passes() {
        let outcome = evaluate(json!({
            "enabled": true,
            "enforced": true,
            "excludedUsers": [],
            "methodsAllowed": ["microsoftAuthenticator", "fido2"]
        }));
        assert!(matches!(outcome, RuleOutcome::Pass(_)));
    }

    #[test]
    fn test_not_enforced_fails() {
        let outcome = evaluate(json!({"enabled": true, "enforced": false}));
        assert_eq!(outcome, RuleOutcome::Fail("MFA is enabled but not enforced".to_string()));
    }

    #[test]
    fn test_exclusions_fail() {
        let outcome = evaluate(json!({
            "enabled": true,
            "enforced": true,
            "excludedUsers": ["u1", "u2"]
        }));
        assert_eq!(outcome, RuleOutcome::Fail("2 user(s) excluded from MFA".to_string()));
    }

    #[test]
    fn test_missing_flags_unknown() {
        assert!(matches!(evaluate(json!({"enabled": true})), RuleOutcome::Unknown(_)));
    }
}
