// AutoAudit data models

pub mod finding;
pub mod resource;
pub mod scan;
pub mod tenant;

// Re-exports for convenience
pub use finding::{Evidence, Finding, UnknownReason, Verdict, TENANT_WIDE_RESOURCE};
pub use resource::{resource_id_of, Freshness, ResourceType, SnapshotKey};
pub use scan::{
    CollectionStatus, FindingSummary, ScanRun, ScanRunId, ScanState, ScanTrigger, TypeOutcome,
};
pub use tenant::Tenant;
