//! Analysis Pipeline
//!
//! Run lifecycle, proposal ledger, orchestration and event delivery.

pub mod broadcaster;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod service;

pub use broadcaster::{ChannelBroadcaster, NoopBroadcaster, TopicEvent, DEFAULT_EVENT_BUFFER_CAPACITY};
pub use ledger::ProposalLedger;
pub use lifecycle::RunLifecycleManager;
pub use metrics::compute_accuracy_metrics;
pub use orchestrator::{AnalysisOrchestrator, RunReport};
pub use service::AnalysisService;
