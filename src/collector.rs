//! One collection pass over a tenant's directory
//!
//! Resource types are collected in parallel, bounded by `max_workers`. Each
//! type paginates until exhausted or until a page fails; pages fetched before
//! a failure stay in the cache. A failure on one type never stops the others.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cache::ResultCache;
use crate::error::FetchError;
use crate::graph::RateLimitedClient;
use crate::models::{resource_id_of, CollectionStatus, ResourceType, SnapshotKey, TypeOutcome};

/// Per-type outcomes of one collection pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionResult {
    pub per_type: BTreeMap<ResourceType, TypeOutcome>,
}

impl CollectionResult {
    /// Complete iff every type is Complete; Partial if any type fetched
    /// something; Failed otherwise. No types at all counts as Complete.
    pub fn aggregate(&self) -> CollectionStatus {
        if self.per_type.values().all(TypeOutcome::is_complete) {
            CollectionStatus::Complete
        } else if self.per_type.values().any(|o| o.pages_fetched > 0) {
            CollectionStatus::Partial
        } else {
            CollectionStatus::Failed
        }
    }

    pub fn outcome(&self, resource_type: ResourceType) -> Option<&TypeOutcome> {
        self.per_type.get(&resource_type)
    }

    pub fn status_of(&self, resource_type: ResourceType) -> CollectionStatus {
        self.outcome(resource_type)
            .map(|o| o.status)
            .unwrap_or(CollectionStatus::Failed)
    }
}

pub struct DataCollector {
    client: Arc<RateLimitedClient>,
    cache: Arc<ResultCache>,
    max_workers: usize,
}

impl DataCollector {
    pub fn new(client: Arc<RateLimitedClient>, cache: Arc<ResultCache>, max_workers: usize) -> Self {
        Self {
            client,
            cache,
            max_workers: max_workers.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<RateLimitedClient> {
        &self.client
    }

    /// Collect every type in `resource_types` for a tenant
    ///
    /// `cancelled` is checked between pages; a set flag stops pagination and
    /// records the type as interrupted.
    pub async fn collect(
        &self,
        tenant_id: &str,
        resource_types: &[ResourceType],
        cancelled: Arc<AtomicBool>,
    ) -> CollectionResult {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = Vec::with_capacity(resource_types.len());

        for &resource_type in resource_types {
            let semaphore = Arc::clone(&semaphore);
            let client = Arc::clone(&self.client);
            let cache = Arc::clone(&self.cache);
            let cancelled = Arc::clone(&cancelled);
            let tenant_id = tenant_id.to_string();

            let task = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let err = FetchError::Transient("collection worker pool closed".to_string());
                        return TypeOutcome::interrupted(0, 0, &err);
                    }
                };
                collect_type(&client, &cache, &tenant_id, resource_type, &cancelled).await
            });

            tasks.push((resource_type, task));
        }

        let mut result = CollectionResult::default();
        for (resource_type, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(tenant = tenant_id, resource_type = %resource_type, "collection task failed: {}", e);
                    let err = FetchError::Transient(format!("collection task failed: {}", e));
                    TypeOutcome::interrupted(0, 0, &err)
                }
            };
            result.per_type.insert(resource_type, outcome);
        }

        info!(
            tenant = tenant_id,
            types = resource_types.len(),
            aggregate = result.aggregate().as_str(),
            "collection pass finished"
        );
        result
    }
}

async fn collect_type(
    client: &RateLimitedClient,
    cache: &ResultCache,
    tenant_id: &str,
    resource_type: ResourceType,
    cancelled: &AtomicBool,
) -> TypeOutcome {
    let mut cursor = client.pages(tenant_id, resource_type);
    let mut items_fetched: u32 = 0;

    loop {
        if cancelled.load(Ordering::SeqCst) {
            debug!(tenant = tenant_id, resource_type = %resource_type, "collection cancelled");
            return TypeOutcome::cancelled(cursor.pages_fetched(), items_fetched);
        }

        match cursor.next().await {
            None => {
                debug!(
                    tenant = tenant_id,
                    resource_type = %resource_type,
                    pages = cursor.pages_fetched(),
                    items = items_fetched,
                    "resource type collected"
                );
                return TypeOutcome::complete(cursor.pages_fetched(), items_fetched);
            }
            Some(Ok(page)) => {
                let fetched_at = Utc::now();
                for item in page.items {
                    let resource_id = resource_id_of(resource_type, &item);
                    cache.put_at(
                        SnapshotKey::new(tenant_id, resource_type, &resource_id),
                        item,
                        fetched_at,
                    );
                    items_fetched += 1;
                }
            }
            Some(Err(err)) => {
                warn!(
                    tenant = tenant_id,
                    resource_type = %resource_type,
                    pages = cursor.pages_fetched(),
                    error = %err,
                    "resource type collection interrupted"
                );
                return TypeOutcome::interrupted(cursor.pages_fetched(), items_fetched, &err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::graph::{MockDirectoryApi, Page, RetryPolicy};
    use crate::models::Freshness;
    use crate::rate_limiter::RateLimiter;
    use serde_json::json;
    use std::time::Duration;

    fn collector(api: MockDirectoryApi) -> DataCollector {
        let client = RateLimitedClient::new(
            Arc::new(api),
            Arc::new(RateLimiter::new()),
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            Duration::from_secs(5),
        );
        DataCollector::new(
            Arc::new(client),
            Arc::new(ResultCache::new(CacheConfig::default())),
            4,
        )
    }

    #[test]
    fn test_aggregate_rules() {
        let mut result = CollectionResult::default();
        assert_eq!(result.aggregate(), CollectionStatus::Complete);

        result
            .per_type
            .insert(ResourceType::Users, TypeOutcome::complete(1, 3));
        assert_eq!(result.aggregate(), CollectionStatus::Complete);

        let err = FetchError::Permanent("403".into());
        result
            .per_type
            .insert(ResourceType::Groups, TypeOutcome::interrupted(0, 0, &err));
        assert_eq!(result.aggregate(), CollectionStatus::Partial);

        let mut failed = CollectionResult::default();
        failed
            .per_type
            .insert(ResourceType::Groups, TypeOutcome::interrupted(0, 0, &err));
        assert_eq!(failed.aggregate(), CollectionStatus::Failed);
    }

    #[tokio::test]
    async fn test_collect_mixed_outcomes() {
        let mut api = MockDirectoryApi::new();
        api.expect_list_page()
            .withf(|_, t, token| *t == ResourceType::Users && token.is_none())
            .returning(|_, _, _| Ok(Page::with_next(vec![json!({"id": "u1"}), json!({"id": "u2"})], "next")));
        api.expect_list_page()
            .withf(|_, t, token| *t == ResourceType::Users && token.is_some())
            .returning(|_, _, _| Err(FetchError::Permanent("400".into())));
        api.expect_list_page()
            .withf(|_, t, _| *t == ResourceType::Groups)
            .returning(|_, _, _| Ok(Page::last(vec![json!({"id": "g1"})])));
        api.expect_list_page()
            .withf(|_, t, _| *t == ResourceType::DirectoryRoles)
            .returning(|_, _, _| Err(FetchError::Permanent("403".into())));

        let collector = collector(api);
        let result = collector
            .collect(
                "contoso",
                &[ResourceType::Users, ResourceType::Groups, ResourceType::DirectoryRoles],
                Arc::new(AtomicBool::new(false)),
            )
            .await;

        assert_eq!(result.status_of(ResourceType::Users), CollectionStatus::Partial);
        assert_eq!(result.outcome(ResourceType::Users).unwrap().items_fetched, 2);
        assert_eq!(result.status_of(ResourceType::Groups), CollectionStatus::Complete);
        assert_eq!(result.status_of(ResourceType::DirectoryRoles), CollectionStatus::Failed);
        assert_eq!(result.aggregate(), CollectionStatus::Partial);

        // Pages fetched before the failure are cached
        let cached = collector
            .cache()
            .get(&SnapshotKey::new("contoso", ResourceType::Users, "u2"));
        assert_eq!(cached.freshness(), Freshness::Fresh);
        assert!(collector
            .cache()
            .snapshots_for("contoso", ResourceType::DirectoryRoles)
            .is_empty());
    }

    #[tokio::test]
    async fn test_collect_honors_cancellation() {
        let mut api = MockDirectoryApi::new();
        api.expect_list_page().never();

        let collector = collector(api);
        let result = collector
            .collect("contoso", &[ResourceType::Users], Arc::new(AtomicBool::new(true)))
            .await;

        let outcome = result.outcome(ResourceType::Users).unwrap();
        assert_eq!(outcome.status, CollectionStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("collection cancelled"));
    }
}
