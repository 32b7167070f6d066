// AutoAudit - Microsoft 365 tenant compliance assessment
// Module re-exports

pub mod cache;
pub mod collector;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod models;
pub mod notify;
pub mod rate_limiter;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use models::{
    CollectionStatus, Finding, FindingSummary, ResourceType, ScanRun, ScanRunId, ScanState,
    ScanTrigger, Tenant, Verdict,
};

pub use cache::{CacheConfig, ResultCache};
pub use collector::{CollectionResult, DataCollector};
pub use commands::AppState;
pub use config::{LogFormat, PipelineConfig};
pub use db::Database;
pub use error::{FetchError, PipelineError};
pub use graph::{DirectoryApi, GraphClient, Page, RateLimitedClient, RetryPolicy};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use report::{ComplianceReport, ReportGenerator};
pub use rules::{ComplianceRule, RuleCatalog, RuleSet};
pub use scanner::{ComplianceScanner, EvaluationSnapshot};
pub use scheduler::ScanScheduler;
