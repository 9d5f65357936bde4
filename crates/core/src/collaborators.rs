//! External Collaborators
//!
//! Traits for the pieces the analysis pipeline depends on but does not own:
//! where messages come from, how they are prefiltered, how proposals are
//! drafted, and where retrieval context comes from.

use async_trait::async_trait;

use crate::draft::{GenerationContext, ProposalDraft};
use crate::error::CoreResult;
use crate::message::{Message, TimeWindow};

/// Read-only source of chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetch every message sent within the window.
    async fn fetch(&self, window: &TimeWindow) -> CoreResult<Vec<Message>>;
}

/// Pluggable message filter applied before grouping.
pub trait PrefilterPolicy: Send + Sync {
    fn apply(&self, messages: Vec<Message>) -> Vec<Message>;
}

/// Drafts task proposals for a batch of messages.
///
/// Failures are reported as `CoreError::Execution`; the orchestrator does not
/// retry them.
#[async_trait]
pub trait ProposalGenerator: Send + Sync {
    async fn generate(
        &self,
        batch: &[Message],
        context: &GenerationContext,
    ) -> CoreResult<Vec<ProposalDraft>>;
}

/// Supplies retrieval context for a batch before generation.
#[async_trait]
pub trait RagContextSource: Send + Sync {
    async fn context_for(&self, batch: &[Message]) -> CoreResult<Option<String>>;
}

/// Prefilter that keeps every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl PrefilterPolicy for PassThroughFilter {
    fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
    }
}

/// Message store over a fixed list, filtered by window on fetch.
#[derive(Debug, Clone, Default)]
pub struct StaticMessageStore {
    messages: Vec<Message>,
}

impl StaticMessageStore {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl MessageStore for StaticMessageStore {
    async fn fetch(&self, window: &TimeWindow) -> CoreResult<Vec<Message>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| window.contains(m.sent_at))
            .cloned()
            .collect())
    }
}
