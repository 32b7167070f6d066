//! Terminal-run notifications
//!
//! The scheduler emits exactly one `RunEvent` per run reaching a terminal
//! state. Sinks must not block the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{FindingSummary, ScanRun, ScanRunId, ScanState};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunEvent {
    pub tenant_id: String,
    pub run_id: ScanRunId,
    pub state: ScanState,
    pub summary: FindingSummary,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ScanRun> for RunEvent {
    fn from(run: &ScanRun) -> Self {
        Self {
            tenant_id: run.tenant_id.clone(),
            run_id: run.id,
            state: run.state,
            summary: run.summary,
            failure_reason: run.failure_reason.clone(),
            completed_at: run.completed_at,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: RunEvent);
}

/// Writes each event to the log
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: RunEvent) {
        match event.state {
            ScanState::Failed => warn!(
                tenant = %event.tenant_id,
                run_id = %event.run_id,
                reason = event.failure_reason.as_deref().unwrap_or("unknown"),
                "scan run failed"
            ),
            state => info!(
                tenant = %event.tenant_id,
                run_id = %event.run_id,
                state = state.as_str(),
                pass = event.summary.pass,
                fail = event.summary.fail,
                unknown = event.summary.unknown,
                "scan run finished"
            ),
        }
    }
}

/// Forwards events to an async channel
pub struct ChannelSink {
    sender: async_channel::Sender<RunEvent>,
}

impl ChannelSink {
    pub fn new(sender: async_channel::Sender<RunEvent>) -> Self {
        Self { sender }
    }

    /// Unbounded sink together with its receiving end
    pub fn unbounded() -> (Self, async_channel::Receiver<RunEvent>) {
        let (sender, receiver) = async_channel::unbounded();
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, event: RunEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("dropping run notification: {}", e);
        }
    }
}
