//! Analysis Events
//!
//! Notifications published on run and proposal transitions. Delivery is
//! fire-and-forget: broadcasters never report failure back to the caller.

use serde::{Deserialize, Serialize};

/// Topic for run lifecycle events
pub const RUN_TOPIC: &str = "analysis_runs";

/// Topic for proposal ledger events
pub const PROPOSAL_TOPIC: &str = "task_proposals";

/// Events emitted by the lifecycle manager, the ledger and the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AnalysisEvent {
    RunCreated {
        run_id: String,
    },
    RunStarted {
        run_id: String,
    },
    RunProgress {
        run_id: String,
        batch_index: usize,
        batch_total: usize,
    },
    RunCompleted {
        run_id: String,
        proposals_total: i64,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
    RunClosed {
        run_id: String,
    },
    ProposalCreated {
        run_id: String,
        proposal_id: String,
    },
    /// A proposal left `pending` (approved, rejected or merged)
    ProposalReviewed {
        run_id: String,
        proposal_id: String,
        status: String,
    },
    ProposalUpdated {
        run_id: String,
        proposal_id: String,
    },
}

impl AnalysisEvent {
    /// Topic this event is published on
    pub fn topic(&self) -> &'static str {
        match self {
            Self::RunCreated { .. }
            | Self::RunStarted { .. }
            | Self::RunProgress { .. }
            | Self::RunCompleted { .. }
            | Self::RunFailed { .. }
            | Self::RunClosed { .. } => RUN_TOPIC,
            Self::ProposalCreated { .. }
            | Self::ProposalReviewed { .. }
            | Self::ProposalUpdated { .. } => PROPOSAL_TOPIC,
        }
    }

    /// Run the event belongs to
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunCreated { run_id }
            | Self::RunStarted { run_id }
            | Self::RunProgress { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunClosed { run_id }
            | Self::ProposalCreated { run_id, .. }
            | Self::ProposalReviewed { run_id, .. }
            | Self::ProposalUpdated { run_id, .. } => run_id,
        }
    }
}

/// Publishes analysis events to UI listeners.
pub trait EventBroadcaster: Send + Sync {
    /// Publish an event. Must not block and must not fail the caller.
    fn notify(&self, topic: &str, event: AnalysisEvent);
}
