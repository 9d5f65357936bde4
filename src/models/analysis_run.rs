//! Analysis Run Models
//!
//! An analysis run covers one message time window and owns the proposals
//! generated from it. Status and counters only change through the lifecycle
//! manager and the proposal ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convo_tasks_core::TimeWindow;

/// Lifecycle status of an analysis run
///
/// ```text
/// pending -> running -> completed -> closed
///                    \-> failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Closed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunStatus {
    /// Statuses that block creating another run
    pub const UNCLOSED: [RunStatus; 3] = [Self::Pending, Self::Running, Self::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Parse from a database string
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_unclosed(&self) -> bool {
        Self::UNCLOSED.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Completed, Self::Closed)
        )
    }
}

/// Proposal counters maintained on the run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalCounters {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub merged: i64,
}

impl ProposalCounters {
    /// Every created proposal is accounted for in exactly one status bucket
    pub fn is_conserved(&self) -> bool {
        self.pending + self.approved + self.rejected + self.merged == self.total
    }
}

/// Review quality figures computed when a run is closed
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccuracyMetrics {
    pub total_proposals: i64,
    pub approved: i64,
    pub rejected: i64,
    pub merged: i64,
    /// approved / total (0 when the run produced nothing)
    pub approval_rate: f64,
    pub rejection_rate: f64,
    pub merge_rate: f64,
    pub average_confidence: f64,
    pub average_confidence_approved: Option<f64>,
    pub average_confidence_rejected: Option<f64>,
    /// Share of approved/rejected proposals whose recommendation matched the decision
    pub recommendation_agreement_rate: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

/// A persisted analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: String,
    pub status: RunStatus,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    /// Configuration captured at creation; opaque to the lifecycle manager
    pub config_snapshot: serde_json::Value,
    pub proposals_total: i64,
    pub proposals_pending: i64,
    pub proposals_approved: i64,
    pub proposals_rejected: i64,
    pub proposals_merged: i64,
    pub batches_processed: i64,
    pub batches_total: i64,
    pub messages_fetched: i64,
    pub messages_analyzed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub accuracy_metrics: Option<AccuracyMetrics>,
}

impl AnalysisRun {
    pub fn time_window(&self) -> TimeWindow {
        TimeWindow {
            start: self.time_window_start,
            end: self.time_window_end,
        }
    }

    pub fn counters(&self) -> ProposalCounters {
        ProposalCounters {
            total: self.proposals_total,
            pending: self.proposals_pending,
            approved: self.proposals_approved,
            rejected: self.proposals_rejected,
            merged: self.proposals_merged,
        }
    }
}
