use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::models::{ResourceType, ScanRunId};

/// Resource id used for a tenant-wide finding when no resource could be enumerated
pub const TENANT_WIDE_RESOURCE: &str = "*";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "fail")]
    Fail,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Verdict::Pass),
            "fail" => Some(Verdict::Fail),
            "unknown" => Some(Verdict::Unknown),
            _ => None,
        }
    }
}

/// Why a finding could not be decided
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    RateLimited,
    Transient,
    Permanent,
    /// Required data was absent from the cache or from the payload
    MissingData,
}

impl UnknownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownReason::RateLimited => "rate_limited",
            UnknownReason::Transient => "transient",
            UnknownReason::Permanent => "permanent",
            UnknownReason::MissingData => "missing_data",
        }
    }
}

impl From<FailureKind> for UnknownReason {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::RateLimited => UnknownReason::RateLimited,
            FailureKind::Transient => UnknownReason::Transient,
            FailureKind::Permanent => UnknownReason::Permanent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub detail: String,
    /// Set whenever the payload came from a snapshot older than the current run
    /// or past its TTL
    pub stale: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub unknown_reason: Option<UnknownReason>,
}

/// Verdict of one rule against one resource within one scan run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub run_id: ScanRunId,
    pub rule_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub verdict: Verdict,
    pub evidence: Evidence,
}

impl Finding {
    pub fn is_unknown(&self) -> bool {
        self.verdict == Verdict::Unknown
    }
}
