//! ID.1: Guest account hygiene
//!
//! Guest (B2B) accounts should not stay enabled in the directory. A user is a
//! guest when `userType` is `Guest` or its UPN carries the `#EXT#` marker.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{bool_field, str_field, ComplianceRule, RuleContext, RuleOutcome};
use crate::models::ResourceType;

static EXTERNAL_UPN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)#EXT#@").ok());

pub struct ID1GuestAccountsRule;

impl ID1GuestAccountsRule {
    fn is_external_upn(upn: &str) -> bool {
        EXTERNAL_UPN
            .as_ref()
            .map_or(false, |pattern| pattern.is_match(upn))
    }
}

impl ComplianceRule for ID1GuestAccountsRule {
    fn id(&self) -> &'static str {
        "ID.1"
    }

    fn title(&self) -> &'static str {
        "No enabled guest accounts"
    }

    fn subject_type(&self) -> ResourceType {
        ResourceType::Users
    }

    fn evaluate(&self, subject: &Value, _ctx: &RuleContext<'_>) -> RuleOutcome {
        let user_type = str_field(subject, "userType");
        let upn = str_field(subject, "userPrincipalName");

        let is_guest = match (user_type, upn) {
            (None, None) => {
                return RuleOutcome::Unknown("user has neither userType nor userPrincipalName".to_string())
            }
            (user_type, upn) => {
                user_type.map_or(false, |t| t.eq_ignore_ascii_case("guest"))
                    || upn.map_or(false, Self::is_external_upn)
            }
        };

        if !is_guest {
            return RuleOutcome::Pass("member account".to_string());
        }

        // Graph omits accountEnabled unless selected; absent means enabled
        match bool_field(subject, "accountEnabled") {
            Some(false) => RuleOutcome::Pass("guest account is disabled".to_string()),
            _ => RuleOutcome::Fail(format!(
                "enabled guest account {}",
                upn.unwrap_or("(no UPN)")
            )),
        }
    }
}
