//! Analysis Service
//!
//! Operator-facing entry point: create, start and close runs, and review the
//! proposals they produce.

use std::sync::Arc;

use tokio::task::JoinHandle;

use convo_tasks_core::{EventBroadcaster, MessageStore, ProposalGenerator, TimeWindow};

use crate::models::{
    AnalysisConfig, AnalysisRun, ProposalStatus, ProposalUpdate, RunStatus, TaskProposal,
};
use crate::storage::config::ConfigService;
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};

use super::broadcaster::ChannelBroadcaster;
use super::ledger::ProposalLedger;
use super::lifecycle::RunLifecycleManager;
use super::orchestrator::{AnalysisOrchestrator, RunReport};

#[derive(Clone)]
pub struct AnalysisService {
    orchestrator: AnalysisOrchestrator,
    config: AnalysisConfig,
}

impl AnalysisService {
    pub fn new(orchestrator: AnalysisOrchestrator, config: AnalysisConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Open the default database and config file under ~/.convo-tasks and wire
    /// a channel broadcaster sized from the config.
    pub fn bootstrap(
        store: Arc<dyn MessageStore>,
        generator: Arc<dyn ProposalGenerator>,
    ) -> AppResult<(Self, Arc<ChannelBroadcaster>)> {
        let config = ConfigService::new()?.get_config_clone();
        let db = Database::new()?;
        let broadcaster = Arc::new(ChannelBroadcaster::new(config.event_buffer_capacity));
        let dyn_broadcaster: Arc<dyn EventBroadcaster> = broadcaster.clone();

        let orchestrator =
            AnalysisOrchestrator::new(db, dyn_broadcaster, store, generator, config.clone());
        tracing::info!("[Analysis] Service ready");
        Ok((Self::new(orchestrator, config), broadcaster))
    }

    fn lifecycle(&self) -> &RunLifecycleManager {
        self.orchestrator.lifecycle()
    }

    fn ledger(&self) -> &ProposalLedger {
        self.orchestrator.ledger()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    // ── Runs ──

    /// Create a pending run, snapshotting the current config onto it
    pub fn create_run(&self, window: TimeWindow) -> AppResult<AnalysisRun> {
        self.lifecycle().create_run(window, self.config.to_snapshot())
    }

    pub fn can_start_new_run(&self) -> AppResult<(bool, Option<String>)> {
        self.lifecycle().can_start_new_run()
    }

    /// Start a pending run on a background task.
    ///
    /// The run is checked before spawning so an obviously invalid start fails
    /// here rather than inside the task.
    pub fn start_run(&self, run_id: &str) -> AppResult<JoinHandle<AppResult<RunReport>>> {
        let run = self.lifecycle().get_run(run_id)?;
        if run.status != RunStatus::Pending {
            return Err(AppError::conflict(format!(
                "Analysis run {} is {}, only pending runs can be started",
                run_id, run.status
            )));
        }
        Ok(self.orchestrator.spawn(run_id.to_string()))
    }

    /// Execute a pending run on the current task
    pub async fn run_to_completion(&self, run_id: &str) -> AppResult<RunReport> {
        self.orchestrator.execute(run_id).await
    }

    pub fn close_run(&self, run_id: &str) -> AppResult<AnalysisRun> {
        self.lifecycle().close_run(run_id)
    }

    pub fn get_run(&self, run_id: &str) -> AppResult<AnalysisRun> {
        self.lifecycle().get_run(run_id)
    }

    pub fn list_runs(&self, limit: usize) -> AppResult<Vec<AnalysisRun>> {
        self.lifecycle().list_runs(limit)
    }

    pub fn current_unclosed_run(&self) -> AppResult<Option<AnalysisRun>> {
        self.lifecycle().current_unclosed_run()
    }

    // ── Proposals ──

    pub fn list_proposals(
        &self,
        run_id: &str,
        status: Option<ProposalStatus>,
    ) -> AppResult<Vec<TaskProposal>> {
        self.ledger().list_for_run(run_id, status)
    }

    pub fn get_proposal(&self, proposal_id: &str) -> AppResult<TaskProposal> {
        self.ledger().get(proposal_id)
    }

    pub fn approve_proposal(&self, proposal_id: &str, reviewer: Option<&str>) -> AppResult<TaskProposal> {
        self.ledger().approve(proposal_id, reviewer)
    }

    pub fn reject_proposal(
        &self,
        proposal_id: &str,
        reason: &str,
        reviewer: Option<&str>,
    ) -> AppResult<TaskProposal> {
        self.ledger().reject(proposal_id, reason, reviewer)
    }

    pub fn merge_proposal(
        &self,
        proposal_id: &str,
        target_id: &str,
        reviewer: Option<&str>,
    ) -> AppResult<TaskProposal> {
        self.ledger().merge(proposal_id, target_id, reviewer)
    }

    pub fn update_proposal(&self, proposal_id: &str, fields: ProposalUpdate) -> AppResult<TaskProposal> {
        self.ledger().update(proposal_id, fields)
    }
}
