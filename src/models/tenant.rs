use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A Microsoft 365 tenant under assessment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: String,
    pub display_name: String,
    /// Interval between automatic scans, in seconds
    pub cadence_secs: u64,
    /// Enabled rule ids. Empty means every built-in rule.
    pub enabled_rules: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: &str, display_name: &str, cadence: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            cadence_secs: cadence.as_secs(),
            enabled_rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_rules(mut self, rules: &[&str]) -> Self {
        self.enabled_rules = rules.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }

    /// Administrative update of the only mutable tenant fields
    pub fn update_schedule(&mut self, cadence: Option<Duration>, enabled_rules: Option<Vec<String>>) {
        if let Some(cadence) = cadence {
            self.cadence_secs = cadence.as_secs();
        }
        if let Some(rules) = enabled_rules {
            self.enabled_rules = rules;
        }
        self.updated_at = Utc::now();
    }

    /// Whether a scan is due given when the last one started
    pub fn is_due(&self, last_started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_started_at {
            None => true,
            Some(started) => {
                let cadence = chrono::Duration::seconds(self.cadence_secs as i64);
                now - started >= cadence
            }
        }
    }
}
