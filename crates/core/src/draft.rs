//! Proposal Drafts
//!
//! Types produced by the external proposal generator and consumed by the
//! proposal ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::message::MessageId;

/// Priority suggested for a proposed task
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl TaskPriority {
    /// Parse from a database or model string. Unknown values fall back to medium.
    pub fn from_str_value(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" | "urgent" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

/// What the generator recommends a reviewer do with a proposal
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRecommendation {
    Approve,
    Reject,
    #[default]
    Review,
}

impl fmt::Display for ReviewRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
            Self::Review => write!(f, "review"),
        }
    }
}

impl ReviewRecommendation {
    /// Parse from a database or model string. Unknown values mean "needs review".
    pub fn from_str_value(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "accept" => Self::Approve,
            "reject" | "decline" => Self::Reject,
            _ => Self::Review,
        }
    }
}

/// Proposal content drafted for one batch of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub analysis_run_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Source messages in conversation order; must not be empty once persisted
    #[serde(default)]
    pub source_message_ids: Vec<MessageId>,
    #[serde(default)]
    pub time_span_seconds: i64,
    pub confidence: f64,
    #[serde(default)]
    pub recommendation: ReviewRecommendation,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ProposalDraft {
    pub fn new(analysis_run_id: impl Into<String>, title: impl Into<String>, confidence: f64) -> Self {
        Self {
            analysis_run_id: analysis_run_id.into(),
            title: title.into(),
            description: String::new(),
            priority: TaskPriority::default(),
            category: None,
            tags: Vec::new(),
            source_message_ids: Vec::new(),
            time_span_seconds: 0,
            confidence,
            recommendation: ReviewRecommendation::default(),
            reasoning: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_sources(mut self, ids: Vec<MessageId>) -> Self {
        self.source_message_ids = ids;
        self
    }

    pub fn with_recommendation(mut self, recommendation: ReviewRecommendation) -> Self {
        self.recommendation = recommendation;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Check the draft can be persisted as a proposal.
    pub fn validate(&self) -> CoreResult<()> {
        if self.analysis_run_id.trim().is_empty() {
            return Err(CoreError::validation("Proposal must reference an analysis run"));
        }
        if self.title.trim().is_empty() {
            return Err(CoreError::validation("Proposal title must not be empty"));
        }
        if self.source_message_ids.is_empty() {
            return Err(CoreError::validation(
                "Proposal must reference at least one source message",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(CoreError::validation(format!(
                "Confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        if self.time_span_seconds < 0 {
            return Err(CoreError::validation("Time span must not be negative"));
        }
        Ok(())
    }
}

/// Context handed to the proposal generator alongside a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationContext {
    pub analysis_run_id: String,
    /// 1-based index of the batch being generated
    pub batch_index: usize,
    pub batch_total: usize,
    /// Free-form description of the project the messages belong to
    pub project_context: Option<String>,
    /// Retrieved background knowledge relevant to the batch
    pub rag_context: Option<String>,
}
