//! Convo Tasks Core
//!
//! Message types, the conversation grouping and batch selection algorithms,
//! proposal draft types, analysis events, and the traits for external
//! collaborators. This crate has no dependency on storage or runtime code.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `message` - Messages, time windows and the `MessageArena` snapshot
//! - `conversation` - Conversation grouping (`group_messages`, `ConversationGroups`)
//! - `batching` - Batch selection (`select_batch`, `drain_batches`)
//! - `draft` - Proposal drafts and generation context
//! - `events` - Analysis events and the `EventBroadcaster` trait
//! - `collaborators` - `MessageStore`, `PrefilterPolicy`, `ProposalGenerator`, `RagContextSource`

pub mod batching;
pub mod collaborators;
pub mod conversation;
pub mod draft;
pub mod error;
pub mod events;
pub mod message;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Messages ───────────────────────────────────────────────────────────
pub use message::{Message, MessageArena, MessageId, TimeWindow};

// ── Grouping & Batching ────────────────────────────────────────────────
pub use batching::{drain_batches, select_batch};
pub use conversation::{
    group_arena, group_messages, ConversationGroups, DEFAULT_IDLE_GAP_SECONDS, UNGROUPED_KEY,
};

// ── Drafts ─────────────────────────────────────────────────────────────
pub use draft::{GenerationContext, ProposalDraft, ReviewRecommendation, TaskPriority};

// ── Events ─────────────────────────────────────────────────────────────
pub use events::{AnalysisEvent, EventBroadcaster, PROPOSAL_TOPIC, RUN_TOPIC};

// ── Collaborators ──────────────────────────────────────────────────────
pub use collaborators::{
    MessageStore, PassThroughFilter, PrefilterPolicy, ProposalGenerator, RagContextSource,
    StaticMessageStore,
};
