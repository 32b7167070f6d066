//! SP.1: External sharing is restricted
//!
//! Anonymous ("anyone") links must be off and externally shared content must
//! expire.

use serde_json::Value;

use super::{bool_field, str_field, ComplianceRule, RuleContext, RuleOutcome};
use crate::models::ResourceType;

pub struct SP1ExternalSharingRule;

impl ComplianceRule for SP1ExternalSharingRule {
    fn id(&self) -> &'static str {
        "SP.1"
    }

    fn title(&self) -> &'static str {
        "External sharing restricted"
    }

    fn subject_type(&self) -> ResourceType {
        ResourceType::SharingSettings
    }

    fn evaluate(&self, subject: &Value, _ctx: &RuleContext<'_>) -> RuleOutcome {
        let anonymous = bool_field(subject, "anonymousLinkEnabled");
        let expiration = bool_field(subject, "requireExternalSharingExpiration");
        let capability = str_field(subject, "sharingCapability").unwrap_or("unknown");

        match (anonymous, expiration) {
            (Some(false), Some(true)) => {
                let days = subject
                    .get("expirationDays")
                    .and_then(Value::as_u64)
                    .map(|d| format!(", links expire after {} days", d))
                    .unwrap_or_default();
                RuleOutcome::Pass(format!("sharing capability '{}'{}", capability, days))
            }
            (Some(true), _) => RuleOutcome::Fail("anonymous sharing links are enabled".to_string()),
            (Some(false), Some(false)) => {
                RuleOutcome::Fail("external sharing does not require expiration".to_string())
            }
            _ => RuleOutcome::Unknown("sharing settings lack link or expiration flags".to_string()),
        }
    }
}
