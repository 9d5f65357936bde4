//! Convo Tasks
//!
//! Turns chat messages into reviewable task proposals. Messages from a time
//! window are grouped into conversations, packed into bounded batches and handed
//! to a proposal generator; the resulting proposals are tracked on an analysis
//! run until a reviewer has approved, rejected or merged every one of them.
//!
//! - `models`: analysis runs, proposals and configuration
//! - `storage`: SQLite database and JSON config file
//! - `services`: run lifecycle, proposal ledger and the orchestrator
//! - `utils`: errors and paths
//!
//! The grouping and batching algorithms and the collaborator traits live in
//! `convo-tasks-core` and are re-exported here.

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

// ── Core ──
pub use convo_tasks_core::{
    AnalysisEvent, EventBroadcaster, GenerationContext, Message, MessageStore, PrefilterPolicy,
    ProposalDraft, ProposalGenerator, RagContextSource, ReviewRecommendation, TaskPriority,
    TimeWindow,
};

// ── Models ──
pub use models::{
    AccuracyMetrics, AnalysisConfig, AnalysisRun, ProposalStatus, ProposalUpdate, ReviewAction,
    RunStatus, SettingsUpdate, TaskProposal,
};

// ── Services ──
pub use services::analysis::{
    AnalysisOrchestrator, AnalysisService, ChannelBroadcaster, NoopBroadcaster, ProposalLedger,
    RunLifecycleManager, RunReport, TopicEvent,
};

// ── Storage ──
pub use storage::{ConfigService, Database};

pub use utils::error::{AppError, AppResult};
