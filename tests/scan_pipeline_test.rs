//! End-to-end scan runs against a scripted directory

mod common;

use std::collections::BTreeSet;

use autoaudit::commands;
use autoaudit::models::{
    CollectionStatus, ResourceType, ScanState, UnknownReason, Verdict, TENANT_WIDE_RESOURCE,
};
use autoaudit::FetchError;
use common::{user, FakeDirectory, Harness};

fn two_pages_of_users() -> Vec<Vec<serde_json::Value>> {
    vec![
        vec![
            user("u1", "Member", true),
            user("u2", "Guest", true),
            user("u3", "Member", true),
        ],
        vec![user("u4", "Guest", false), user("u5", "Member", false)],
    ]
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_policies_give_partial_run() {
    let directory = FakeDirectory::new();
    directory.set_pages(ResourceType::Users, two_pages_of_users());
    directory.fail_always(
        ResourceType::ConditionalAccessPolicies,
        FetchError::RateLimited { retry_after: None },
    );
    let harness = Harness::new(directory);
    harness.register("contoso", &["ID.1", "CA.1"]).await;

    let run_id = commands::trigger_scan(&harness.state, "contoso").await.unwrap();
    let run = harness.state.scheduler.await_run(run_id).await.unwrap();

    assert_eq!(run.state, ScanState::PartiallyCompleted);
    let users = &run.outcomes[&ResourceType::Users];
    assert_eq!(users.status, CollectionStatus::Complete);
    assert_eq!(users.pages_fetched, 2);
    assert_eq!(users.items_fetched, 5);
    assert_eq!(
        run.outcomes[&ResourceType::ConditionalAccessPolicies].status,
        CollectionStatus::Failed
    );

    let details = commands::get_run(&harness.state, run_id).await.unwrap();
    let user_findings: Vec<_> = details
        .findings
        .iter()
        .filter(|f| f.rule_id == "ID.1")
        .collect();
    assert_eq!(user_findings.len(), 5);
    let failed: Vec<_> = user_findings
        .iter()
        .filter(|f| f.verdict == Verdict::Fail)
        .map(|f| f.resource_id.as_str())
        .collect();
    assert_eq!(failed, vec!["u2"]);
    assert!(user_findings.iter().all(|f| !f.evidence.stale));

    let policy_findings: Vec<_> = details
        .findings
        .iter()
        .filter(|f| f.rule_id == "CA.1")
        .collect();
    assert_eq!(policy_findings.len(), 1);
    assert_eq!(policy_findings[0].verdict, Verdict::Unknown);
    assert_eq!(policy_findings[0].resource_id, TENANT_WIDE_RESOURCE);
    assert_eq!(
        policy_findings[0].evidence.unknown_reason,
        Some(UnknownReason::RateLimited)
    );

    assert_eq!(run.summary.total, 6);
    assert_eq!(run.summary.unknown, 1);

    let event = harness.events.recv().await.unwrap();
    assert_eq!(event.run_id, run_id);
    assert_eq!(event.state, ScanState::PartiallyCompleted);
}

#[tokio::test(start_paused = true)]
async fn test_report_explains_unknowns() {
    let directory = FakeDirectory::new();
    directory.set_pages(ResourceType::Users, two_pages_of_users());
    directory.fail_always(
        ResourceType::ConditionalAccessPolicies,
        FetchError::Permanent("403 Forbidden".into()),
    );
    let harness = Harness::new(directory);
    harness.register("contoso", &["ID.1", "CA.1"]).await;

    let run_id = commands::trigger_scan(&harness.state, "contoso").await.unwrap();
    harness.state.scheduler.await_run(run_id).await.unwrap();

    let report = commands::get_report(&harness.state, run_id).await.unwrap();
    assert_eq!(report.state, ScanState::PartiallyCompleted);
    assert_eq!(
        report.incomplete_types(),
        vec![ResourceType::ConditionalAccessPolicies]
    );
    assert_eq!(report.unknowns.len(), 1);
    assert_eq!(report.unknowns[0].reason, Some(UnknownReason::Permanent));
    assert_eq!(report.failures.len(), 1);

    // Permanent failures are not retried
    assert_eq!(
        harness
            .directory
            .calls_for(ResourceType::ConditionalAccessPolicies),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_type_failing_fails_the_run() {
    let directory = FakeDirectory::new();
    directory.fail_always(ResourceType::Users, FetchError::Transient("reset".into()));
    let harness = Harness::new(directory);
    harness.register("contoso", &["ID.1"]).await;

    let run_id = commands::trigger_scan(&harness.state, "contoso").await.unwrap();
    let run = harness.state.scheduler.await_run(run_id).await.unwrap();

    assert_eq!(run.state, ScanState::Failed);
    assert!(run.failure_reason.is_some());
    assert!(commands::get_latest_run(&harness.state, "contoso")
        .await
        .unwrap()
        .is_none());
    // Retried up to the attempt limit
    assert_eq!(harness.directory.calls_for(ResourceType::Users), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_data_gives_identical_verdicts() {
    let directory = FakeDirectory::new();
    directory.set_pages(ResourceType::Users, two_pages_of_users());
    let harness = Harness::new(directory);
    harness.register("contoso", &["ID.1"]).await;

    let mut verdicts = Vec::new();
    for _ in 0..2 {
        let run_id = commands::trigger_scan(&harness.state, "contoso").await.unwrap();
        let run = harness.state.scheduler.await_run(run_id).await.unwrap();
        assert_eq!(run.state, ScanState::Completed);

        let details = commands::get_run(&harness.state, run_id).await.unwrap();
        let set: BTreeSet<_> = details
            .findings
            .iter()
            .map(|f| (f.rule_id.clone(), f.resource_id.clone(), f.verdict.as_str()))
            .collect();
        verdicts.push(set);
    }

    assert_eq!(verdicts[0], verdicts[1]);
    let runs = commands::list_runs(&harness.state, "contoso", None).await.unwrap();
    assert_eq!(runs.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_partial_pagination_marks_older_snapshots_stale() {
    let directory = FakeDirectory::new();
    directory.set_pages(ResourceType::Users, two_pages_of_users());
    let harness = Harness::new(directory);
    harness.register("contoso", &["ID.1"]).await;

    let first = commands::trigger_scan(&harness.state, "contoso").await.unwrap();
    harness.state.scheduler.await_run(first).await.unwrap();

    // Second page now fails: its users are only available from the first run
    harness.directory.fail_from_page(
        ResourceType::Users,
        1,
        FetchError::Transient("connection reset".into()),
    );
    let second = commands::trigger_scan(&harness.state, "contoso").await.unwrap();
    let run = harness.state.scheduler.await_run(second).await.unwrap();

    assert_eq!(run.state, ScanState::PartiallyCompleted);
    assert_eq!(
        run.outcomes[&ResourceType::Users].status,
        CollectionStatus::Partial
    );

    let details = commands::get_run(&harness.state, second).await.unwrap();
    assert_eq!(details.findings.len(), 5);
    for finding in &details.findings {
        let expect_stale = matches!(finding.resource_id.as_str(), "u4" | "u5");
        assert_eq!(finding.evidence.stale, expect_stale, "{}", finding.resource_id);
        assert_ne!(finding.verdict, Verdict::Unknown);
    }

    let report = commands::get_report(&harness.state, second).await.unwrap();
    assert_eq!(report.stale_findings, 2);
}
