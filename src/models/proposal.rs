//! Task Proposal Models
//!
//! Machine-suggested units of work awaiting human disposition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convo_tasks_core::{MessageId, ReviewRecommendation, TaskPriority};

/// Review status of a proposal. Transitions are one-way out of `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Merged,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Merged => "merged",
        }
    }

    /// Parse from a database string
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }
}

/// Reviewer action recorded on a proposal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
    Merge,
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Merge => "merge",
        }
    }

    pub fn from_str_value(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }

    /// Status a pending proposal moves to under this action
    pub fn resulting_status(&self) -> ProposalStatus {
        match self {
            Self::Approve => ProposalStatus::Approved,
            Self::Reject => ProposalStatus::Rejected,
            Self::Merge => ProposalStatus::Merged,
        }
    }
}

/// A persisted task proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProposal {
    pub id: String,
    pub analysis_run_id: String,
    pub proposed_title: String,
    pub proposed_description: String,
    pub proposed_priority: TaskPriority,
    pub proposed_category: Option<String>,
    pub proposed_tags: Vec<String>,
    pub source_message_ids: Vec<MessageId>,
    pub message_count: i64,
    pub time_span_seconds: i64,
    pub confidence: f64,
    pub llm_recommendation: ReviewRecommendation,
    pub reasoning: Option<String>,
    pub status: ProposalStatus,
    pub review_action: Option<ReviewAction>,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Proposal this one was folded into, when merged
    pub merged_into_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a proposal's editable content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ProposalUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.tags.is_none()
    }

    /// Apply the update to a proposal in memory
    pub fn apply_to(&self, proposal: &mut TaskProposal) {
        if let Some(title) = &self.title {
            proposal.proposed_title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            proposal.proposed_description = description.clone();
        }
        if let Some(priority) = self.priority {
            proposal.proposed_priority = priority;
        }
        if let Some(category) = &self.category {
            proposal.proposed_category = Some(category.clone());
        }
        if let Some(tags) = &self.tags {
            proposal.proposed_tags = tags.clone();
        }
    }
}
