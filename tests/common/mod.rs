//! Common test helpers for integration tests
//!
//! `FakeDirectory` stands in for Microsoft Graph: pages and failures are
//! scripted per resource type, and an optional gate holds every call until the
//! test opens it (to keep a run in Collecting). `Harness` wires a full
//! pipeline on a temporary database.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use autoaudit::commands::{self, AppState};
use autoaudit::graph::{DirectoryApi, Page};
use autoaudit::models::{ResourceType, ScanRunId, ScanState, Tenant};
use autoaudit::notify::{ChannelSink, RunEvent};
use autoaudit::{Database, FetchError, PipelineConfig, RetryPolicy};

const PAGE_TOKEN_PREFIX: &str = "page-";

#[derive(Default)]
pub struct FakeDirectory {
    pages: Mutex<HashMap<ResourceType, Vec<Vec<Value>>>>,
    /// Sticky failure for every page at or after the given index
    failures: Mutex<HashMap<ResourceType, (usize, FetchError)>>,
    /// One-shot failures consumed before anything else
    next_errors: Mutex<HashMap<ResourceType, VecDeque<FetchError>>>,
    calls: Mutex<Vec<(ResourceType, Option<String>)>>,
    gate: Option<watch::Sender<bool>>,
    /// Latency added to every call after it is recorded
    latency: Mutex<Option<Duration>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call blocks until `open_gate` is called
    pub fn gated() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn set_pages(&self, resource_type: ResourceType, pages: Vec<Vec<Value>>) {
        self.pages.lock().unwrap().insert(resource_type, pages);
    }

    pub fn fail_always(&self, resource_type: ResourceType, error: FetchError) {
        self.fail_from_page(resource_type, 0, error);
    }

    pub fn fail_from_page(&self, resource_type: ResourceType, page: usize, error: FetchError) {
        self.failures
            .lock()
            .unwrap()
            .insert(resource_type, (page, error));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn fail_next(&self, resource_type: ResourceType, error: FetchError) {
        self.next_errors
            .lock()
            .unwrap()
            .entry(resource_type)
            .or_default()
            .push_back(error);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    pub fn calls_for(&self, resource_type: ResourceType) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == resource_type)
            .count()
    }

    fn page_index(page_token: &Option<String>) -> usize {
        page_token
            .as_deref()
            .and_then(|token| token.strip_prefix(PAGE_TOKEN_PREFIX))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DirectoryApi for FakeDirectory {
    async fn list_page(
        &self,
        _tenant_id: &str,
        resource_type: ResourceType,
        page_token: Option<String>,
    ) -> Result<Page, FetchError> {
        if let Some(gate) = &self.gate {
            let mut open = gate.subscribe();
            let _ = open.wait_for(|open| *open).await;
        }

        self.calls
            .lock()
            .unwrap()
            .push((resource_type, page_token.clone()));

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self
            .next_errors
            .lock()
            .unwrap()
            .get_mut(&resource_type)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let index = Self::page_index(&page_token);
        if let Some((from, error)) = self.failures.lock().unwrap().get(&resource_type) {
            if index >= *from {
                return Err(error.clone());
            }
        }

        let pages = self.pages.lock().unwrap();
        let Some(type_pages) = pages.get(&resource_type) else {
            return Ok(Page::default());
        };
        let items = type_pages.get(index).cloned().unwrap_or_default();
        if index + 1 < type_pages.len() {
            Ok(Page::with_next(
                items,
                &format!("{}{}", PAGE_TOKEN_PREFIX, index + 1),
            ))
        } else {
            Ok(Page::last(items))
        }
    }
}

/// Config with quick retries so failing types settle fast
pub fn test_config(data_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: data_dir.to_path_buf(),
        retry: RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: 3,
            ..RetryPolicy::default()
        },
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    /// Temporary data directory (kept alive until drop)
    pub temp_dir: TempDir,
    pub directory: Arc<FakeDirectory>,
    pub state: AppState,
    pub events: async_channel::Receiver<RunEvent>,
}

impl Harness {
    pub fn new(directory: FakeDirectory) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let db = Arc::new(Database::open_in(temp_dir.path()).unwrap());
        let directory = Arc::new(directory);
        let (sink, events) = ChannelSink::unbounded();

        let state = AppState::new(
            config,
            db,
            Arc::clone(&directory) as Arc<dyn DirectoryApi>,
            Arc::new(sink),
        );

        Self {
            temp_dir,
            directory,
            state,
            events,
        }
    }

    pub async fn register(&self, tenant_id: &str, rules: &[&str]) -> Tenant {
        let rules = rules.iter().map(|r| r.to_string()).collect();
        commands::register_tenant(&self.state, tenant_id, tenant_id, None, rules)
            .await
            .unwrap()
    }

    /// Poll the stored run until it reaches `target`
    pub async fn wait_for_state(&self, run_id: ScanRunId, target: ScanState) {
        for _ in 0..200 {
            let details = commands::get_run(&self.state, run_id).await.unwrap();
            if details.run.state == target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {} never reached {}", run_id, target.as_str());
    }
}

pub fn user(id: &str, user_type: &str, enabled: bool) -> Value {
    serde_json::json!({
        "id": id,
        "userPrincipalName": format!("{}@contoso.com", id),
        "userType": user_type,
        "accountEnabled": enabled,
    })
}
