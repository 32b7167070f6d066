//! ADM.1 / ADM.2: Privileged directory roles
//!
//! ADM.1 keeps the Global Administrator role between two and four members:
//! one is a single point of failure, more than four widens the blast radius.
//! ADM.2 requires that no member of a directory role is excluded from MFA,
//! which needs the authentication methods policy alongside the roles.

use serde_json::Value;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use super::{str_field, str_list, ComplianceRule, RuleContext, RuleOutcome};
use crate::models::ResourceType;

const GLOBAL_ADMIN_ROLE: &str = "Global Administrator";
const GLOBAL_ADMIN_RANGE: RangeInclusive<usize> = 2..=4;

fn role_name(role: &Value) -> &str {
    str_field(role, "displayName").unwrap_or("(unnamed role)")
}

fn member_ids(role: &Value) -> Option<Vec<&str>> {
    role.get("members").and_then(Value::as_array).map(|members| {
        members
            .iter()
            .filter_map(|member| str_field(member, "id"))
            .collect()
    })
}

pub struct ADM1GlobalAdminCountRule;

impl ComplianceRule for ADM1GlobalAdminCountRule {
    fn id(&self) -> &'static str {
        "ADM.1"
    }

    fn title(&self) -> &'static str {
        "Global Administrator count within bounds"
    }

    fn subject_type(&self) -> ResourceType {
        ResourceType::DirectoryRoles
    }

    fn evaluate(&self, subject: &Value, _ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(name) = str_field(subject, "displayName") else {
            return RuleOutcome::Unknown("directory role has no displayName".to_string());
        };
        if name != GLOBAL_ADMIN_ROLE {
            return RuleOutcome::Pass(format!("'{}' is not subject to the count bound", name));
        }

        let Some(members) = member_ids(subject) else {
            return RuleOutcome::Unknown("role members were not expanded".to_string());
        };

        let count = members.len();
        if GLOBAL_ADMIN_RANGE.contains(&count) {
            RuleOutcome::Pass(format!("{} Global Administrators", count))
        } else {
            RuleOutcome::Fail(format!(
                "{} Global Administrators, expected {} to {}",
                count,
                GLOBAL_ADMIN_RANGE.start(),
                GLOBAL_ADMIN_RANGE.end()
            ))
        }
    }
}

pub struct ADM2PrivilegedMfaRule;

impl ComplianceRule for ADM2PrivilegedMfaRule {
    fn id(&self) -> &'static str {
        "ADM.2"
    }

    fn title(&self) -> &'static str {
        "Privileged role members are not excluded from MFA"
    }

    fn subject_type(&self) -> ResourceType {
        ResourceType::DirectoryRoles
    }

    fn required_types(&self) -> Vec<ResourceType> {
        vec![
            ResourceType::DirectoryRoles,
            ResourceType::AuthenticationMethodsPolicy,
        ]
    }

    fn evaluate(&self, subject: &Value, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(members) = member_ids(subject) else {
            return RuleOutcome::Unknown("role members were not expanded".to_string());
        };

        let policies = ctx.resources(ResourceType::AuthenticationMethodsPolicy);
        if policies.is_empty() {
            return RuleOutcome::Unknown("no authentication methods policy available".to_string());
        }

        let excluded: BTreeSet<String> = policies
            .iter()
            .flat_map(|policy| str_list(&policy.payload, "excludedUsers").unwrap_or_default())
            .collect();

        let mut offenders: Vec<&str> = members
            .into_iter()
            .filter(|id| excluded.contains(*id))
            .collect();
        offenders.sort_unstable();
        offenders.dedup();

        if offenders.is_empty() {
            RuleOutcome::Pass(format!("no member of '{}' is excluded from MFA", role_name(subject)))
        } else {
            RuleOutcome::Fail(format!(
                "members of '{}' excluded from MFA: {}",
                role_name(subject),
                offenders.join(", ")
            ))
        }
    }
}
