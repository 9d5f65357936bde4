//! Services
//!
//! Business logic services for the application.

pub mod analysis;

pub use analysis::{
    AnalysisOrchestrator, AnalysisService, ChannelBroadcaster, NoopBroadcaster, ProposalLedger,
    RunLifecycleManager, RunReport,
};
