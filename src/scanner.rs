//! Rule evaluation over a captured collection snapshot
//!
//! The snapshot is taken once, when collection ends, so every rule in a run
//! sees the same data. For a type collected completely in this run only
//! resources fetched during the run are kept; resources that disappeared from
//! the directory drop out. For a partially collected or failed type every
//! cached resource is kept, and those older than the run are flagged stale.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::cache::ResultCache;
use crate::collector::CollectionResult;
use crate::error::FailureKind;
use crate::models::{
    CollectionStatus, Evidence, Finding, Freshness, ResourceType, ScanRunId, UnknownReason,
    Verdict, TENANT_WIDE_RESOURCE,
};
use crate::rules::{RuleContext, RuleOutcome, RuleSet};

/// One resource as seen by the rules
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotResource {
    pub resource_id: String,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct TypeSnapshot {
    status: CollectionStatus,
    failure: Option<FailureKind>,
    resources: Vec<SnapshotResource>,
}

/// Evaluation input, consistent with the end of Collecting
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSnapshot {
    tenant_id: String,
    types: BTreeMap<ResourceType, TypeSnapshot>,
}

impl EvaluationSnapshot {
    pub fn empty(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            types: BTreeMap::new(),
        }
    }

    /// Add a type with explicit resources
    pub fn with_type(
        mut self,
        resource_type: ResourceType,
        status: CollectionStatus,
        mut resources: Vec<SnapshotResource>,
    ) -> Self {
        resources.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        self.types.insert(
            resource_type,
            TypeSnapshot {
                status,
                failure: None,
                resources,
            },
        );
        self
    }

    pub fn capture(
        cache: &ResultCache,
        tenant_id: &str,
        run_started_at: DateTime<Utc>,
        collection: &CollectionResult,
    ) -> Self {
        Self::capture_at(cache, tenant_id, run_started_at, collection, Utc::now())
    }

    pub fn capture_at(
        cache: &ResultCache,
        tenant_id: &str,
        run_started_at: DateTime<Utc>,
        collection: &CollectionResult,
        now: DateTime<Utc>,
    ) -> Self {
        let mut types = BTreeMap::new();

        for (&resource_type, outcome) in &collection.per_type {
            let cached = cache.snapshots_for_at(tenant_id, resource_type, now);
            let resources: Vec<SnapshotResource> = cached
                .into_iter()
                .filter(|entry| {
                    outcome.status != CollectionStatus::Complete || entry.fetched_at >= run_started_at
                })
                .map(|entry| SnapshotResource {
                    stale: entry.freshness == Freshness::Stale || entry.fetched_at < run_started_at,
                    resource_id: entry.resource_id,
                    payload: entry.payload,
                    fetched_at: entry.fetched_at,
                })
                .collect();

            debug!(
                tenant = tenant_id,
                resource_type = %resource_type,
                status = outcome.status.as_str(),
                resources = resources.len(),
                "captured evaluation snapshot"
            );

            types.insert(
                resource_type,
                TypeSnapshot {
                    status: outcome.status,
                    failure: outcome.failure,
                    resources,
                },
            );
        }

        Self {
            tenant_id: tenant_id.to_string(),
            types,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn resources(&self, resource_type: ResourceType) -> &[SnapshotResource] {
        self.types
            .get(&resource_type)
            .map(|t| t.resources.as_slice())
            .unwrap_or(&[])
    }

    /// Collection status of a type; a type that was never collected counts as Failed
    pub fn status(&self, resource_type: ResourceType) -> CollectionStatus {
        self.types
            .get(&resource_type)
            .map(|t| t.status)
            .unwrap_or(CollectionStatus::Failed)
    }

    fn failure(&self, resource_type: ResourceType) -> Option<FailureKind> {
        self.types.get(&resource_type).and_then(|t| t.failure)
    }

    fn has_stale(&self, resource_type: ResourceType) -> bool {
        self.resources(resource_type).iter().any(|r| r.stale)
    }
}

pub struct ComplianceScanner;

impl ComplianceScanner {
    /// Findings for every rule over every resource of its subject type
    ///
    /// Pure: the same snapshot and rule set always produce the same findings
    /// in the same order (rules by id, then resources by id).
    pub fn evaluate(run_id: ScanRunId, snapshot: &EvaluationSnapshot, rules: &RuleSet) -> Vec<Finding> {
        let ctx = RuleContext::new(snapshot);
        let mut findings = Vec::new();

        for rule in rules.rules() {
            let subject_type = rule.subject_type();
            let required = rule.required_types();
            let subjects = snapshot.resources(subject_type);

            let failed_type = required
                .iter()
                .copied()
                .find(|t| snapshot.status(*t) == CollectionStatus::Failed);

            if let Some(failed_type) = failed_type {
                let reason = snapshot
                    .failure(failed_type)
                    .map(UnknownReason::from)
                    .unwrap_or(UnknownReason::MissingData);
                let detail = format!("{} collection failed ({})", failed_type, reason.as_str());

                if subjects.is_empty() {
                    findings.push(Finding {
                        run_id,
                        rule_id: rule.id().to_string(),
                        resource_type: subject_type,
                        resource_id: TENANT_WIDE_RESOURCE.to_string(),
                        verdict: Verdict::Unknown,
                        evidence: Evidence {
                            detail: format!("{}; no cached snapshot to enumerate", detail),
                            stale: false,
                            fetched_at: None,
                            unknown_reason: Some(reason),
                        },
                    });
                } else {
                    for subject in subjects {
                        findings.push(Finding {
                            run_id,
                            rule_id: rule.id().to_string(),
                            resource_type: subject_type,
                            resource_id: subject.resource_id.clone(),
                            verdict: Verdict::Unknown,
                            evidence: Evidence {
                                detail: detail.clone(),
                                stale: subject.stale,
                                fetched_at: Some(subject.fetched_at),
                                unknown_reason: Some(reason),
                            },
                        });
                    }
                }
                continue;
            }

            let supporting_stale = required
                .iter()
                .filter(|t| **t != subject_type)
                .any(|t| snapshot.has_stale(*t));

            for subject in subjects {
                let (verdict, detail, unknown_reason) = match rule.evaluate(&subject.payload, &ctx) {
                    RuleOutcome::Pass(detail) => (Verdict::Pass, detail, None),
                    RuleOutcome::Fail(detail) => (Verdict::Fail, detail, None),
                    RuleOutcome::Unknown(detail) => {
                        (Verdict::Unknown, detail, Some(UnknownReason::MissingData))
                    }
                };

                findings.push(Finding {
                    run_id,
                    rule_id: rule.id().to_string(),
                    resource_type: subject_type,
                    resource_id: subject.resource_id.clone(),
                    verdict,
                    evidence: Evidence {
                        detail,
                        stale: subject.stale || supporting_stale,
                        fetched_at: Some(subject.fetched_at),
                        unknown_reason,
                    },
                });
            }
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::FetchError;
    use crate::models::{SnapshotKey, TypeOutcome};
    use crate::rules::RuleCatalog;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn rules(ids: &[&str]) -> RuleSet {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        RuleCatalog::builtin().resolve(&ids).unwrap()
    }

    fn cache() -> ResultCache {
        ResultCache::new(CacheConfig {
            ttl: Duration::from_secs(600),
            grace: Duration::from_secs(86_400),
            capacity: 1_000,
        })
    }

    fn outcome_map(entries: &[(ResourceType, TypeOutcome)]) -> CollectionResult {
        CollectionResult {
            per_type: entries.iter().cloned().collect(),
        }
    }

    #[test]
    fn test_capture_drops_vanished_resources_for_complete_types() {
        let cache = cache();
        let run_started = Utc::now();
        let earlier = run_started - chrono::Duration::seconds(60);

        cache.put_at(SnapshotKey::new("contoso", ResourceType::Users, "gone"), json!({}), earlier);
        cache.put_at(SnapshotKey::new("contoso", ResourceType::Users, "u1"), json!({}), run_started);

        let collection = outcome_map(&[(ResourceType::Users, TypeOutcome::complete(1, 1))]);
        let snapshot = EvaluationSnapshot::capture_at(&cache, "contoso", run_started, &collection, run_started);

        let ids: Vec<&str> = snapshot
            .resources(ResourceType::Users)
            .iter()
            .map(|r| r.resource_id.as_str())
            .collect();
        assert_eq!(ids, vec!["u1"]);
    }

    #[test]
    fn test_capture_keeps_older_resources_for_failed_types_as_stale() {
        let cache = cache();
        let run_started = Utc::now();
        let earlier = run_started - chrono::Duration::seconds(60);
        cache.put_at(
            SnapshotKey::new("contoso", ResourceType::ConditionalAccessPolicies, "p1"),
            json!({"state": "enabled"}),
            earlier,
        );

        let err = FetchError::RateLimited { retry_after: None };
        let collection = outcome_map(&[(
            ResourceType::ConditionalAccessPolicies,
            TypeOutcome::interrupted(0, 0, &err),
        )]);
        let snapshot = EvaluationSnapshot::capture_at(&cache, "contoso", run_started, &collection, run_started);

        let resources = snapshot.resources(ResourceType::ConditionalAccessPolicies);
        assert_eq!(resources.len(), 1);
        assert!(resources[0].stale);
    }

    #[test]
    fn test_failed_required_type_yields_only_unknown() {
        let snapshot = EvaluationSnapshot::empty("contoso")
            .with_type(
                ResourceType::DirectoryRoles,
                CollectionStatus::Complete,
                vec![SnapshotResource {
                    resource_id: "r1".to_string(),
                    payload: json!({"displayName": "Global Administrator", "members": [{"id": "u1"}, {"id": "u2"}]}),
                    fetched_at: Utc::now(),
                    stale: false,
                }],
            )
            .with_type(ResourceType::AuthenticationMethodsPolicy, CollectionStatus::Failed, vec![]);

        let findings = ComplianceScanner::evaluate(Uuid::new_v4(), &snapshot, &rules(&["ADM.1", "ADM.2"]));

        let adm1: Vec<&Finding> = findings.iter().filter(|f| f.rule_id == "ADM.1").collect();
        let adm2: Vec<&Finding> = findings.iter().filter(|f| f.rule_id == "ADM.2").collect();
        assert_eq!(adm1.len(), 1);
        assert_eq!(adm1[0].verdict, Verdict::Pass);
        assert_eq!(adm2.len(), 1);
        assert_eq!(adm2[0].verdict, Verdict::Unknown);
        assert_eq!(adm2[0].resource_id, "r1");
        assert_eq!(adm2[0].evidence.unknown_reason, Some(UnknownReason::MissingData));
    }

    #[test]
    fn test_failed_type_without_cache_yields_tenant_wide_unknown() {
        let cache = cache();
        let run_started = Utc::now();
        let err = FetchError::Permanent("403".into());
        let collection = outcome_map(&[(
            ResourceType::SharingSettings,
            TypeOutcome::interrupted(0, 0, &err),
        )]);
        let snapshot = EvaluationSnapshot::capture_at(&cache, "contoso", run_started, &collection, run_started);

        let findings = ComplianceScanner::evaluate(Uuid::new_v4(), &snapshot, &rules(&["SP.1"]));

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_id, TENANT_WIDE_RESOURCE);
        assert_eq!(findings[0].verdict, Verdict::Unknown);
        assert_eq!(findings[0].evidence.unknown_reason, Some(UnknownReason::Permanent));
    }

    #[test]
    fn test_stale_data_is_flagged_on_evidence() {
        let snapshot = EvaluationSnapshot::empty("contoso").with_type(
            ResourceType::ConditionalAccessPolicies,
            CollectionStatus::Partial,
            vec![SnapshotResource {
                resource_id: "p1".to_string(),
                payload: json!({"state": "enabled"}),
                fetched_at: Utc::now(),
                stale: true,
            }],
        );

        let findings = ComplianceScanner::evaluate(Uuid::new_v4(), &snapshot, &rules(&["CA.1"]));
        assert_eq!(findings[0].verdict, Verdict::Pass);
        assert!(findings[0].evidence.stale);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let fetched_at = Utc::now();
        let users: Vec<SnapshotResource> = ["u3", "u1", "u2"]
            .iter()
            .map(|id| {
                let user_type = if *id == "u2" { "Guest" } else { "Member" };
                SnapshotResource {
                    resource_id: id.to_string(),
                    payload: json!({"id": id, "userType": user_type}),
                    fetched_at,
                    stale: false,
                }
            })
            .collect();
        let snapshot = EvaluationSnapshot::empty("contoso").with_type(
            ResourceType::Users,
            CollectionStatus::Complete,
            users,
        );
        let run_id = Uuid::new_v4();
        let rule_set = rules(&[]);

        let first = ComplianceScanner::evaluate(run_id, &snapshot, &rule_set);
        let second = ComplianceScanner::evaluate(run_id, &snapshot, &rule_set);
        assert_eq!(first, second);

        let id1: Vec<(&str, Verdict)> = first
            .iter()
            .filter(|f| f.rule_id == "ID.1")
            .map(|f| (f.resource_id.as_str(), f.verdict))
            .collect();
        assert_eq!(
            id1,
            vec![("u1", Verdict::Pass), ("u2", Verdict::Fail), ("u3", Verdict::Pass)]
        );
    }
}
