//! Analysis Orchestrator
//!
//! Drives one run end to end: fetch, prefilter, group, drain batches, generate
//! and persist proposals, then complete. Batches run strictly one after another.
//!
//! A failure after the run has started marks it failed with the error text and is
//! returned as `AppError::Execution`. Proposals persisted by earlier batches stay.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use convo_tasks_core::{
    drain_batches, group_arena, EventBroadcaster, GenerationContext, Message, MessageArena,
    MessageId, MessageStore, PassThroughFilter, PrefilterPolicy, ProposalDraft,
    ProposalGenerator, RagContextSource,
};

use crate::models::{AnalysisConfig, AnalysisRun, RunStatus};
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};

use super::ledger::ProposalLedger;
use super::lifecycle::RunLifecycleManager;

/// Summary of one orchestration pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub messages_fetched: usize,
    pub messages_analyzed: usize,
    pub batches_total: usize,
    pub batches_processed: usize,
    pub proposals_created: usize,
    /// Status the run ended in, `None` if the final transition could not be recorded
    pub final_status: Option<RunStatus>,
}

#[derive(Clone)]
pub struct AnalysisOrchestrator {
    lifecycle: RunLifecycleManager,
    ledger: ProposalLedger,
    store: Arc<dyn MessageStore>,
    prefilter: Arc<dyn PrefilterPolicy>,
    generator: Arc<dyn ProposalGenerator>,
    rag_source: Option<Arc<dyn RagContextSource>>,
    config: AnalysisConfig,
}

impl AnalysisOrchestrator {
    pub fn new(
        db: Database,
        broadcaster: Arc<dyn EventBroadcaster>,
        store: Arc<dyn MessageStore>,
        generator: Arc<dyn ProposalGenerator>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            lifecycle: RunLifecycleManager::new(db.clone(), broadcaster.clone()),
            ledger: ProposalLedger::new(db, broadcaster),
            store,
            prefilter: Arc::new(PassThroughFilter),
            generator,
            rag_source: None,
            config,
        }
    }

    pub fn with_prefilter(mut self, prefilter: Arc<dyn PrefilterPolicy>) -> Self {
        self.prefilter = prefilter;
        self
    }

    pub fn with_rag_source(mut self, source: Arc<dyn RagContextSource>) -> Self {
        self.rag_source = Some(source);
        self
    }

    pub fn lifecycle(&self) -> &RunLifecycleManager {
        &self.lifecycle
    }

    pub fn ledger(&self) -> &ProposalLedger {
        &self.ledger
    }

    /// Run the orchestrator on a background task
    pub fn spawn(&self, run_id: String) -> JoinHandle<AppResult<RunReport>> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.execute(&run_id).await })
    }

    /// Execute a pending run.
    ///
    /// Errors from `start_run` are returned as they are; the run is left untouched.
    pub async fn execute(&self, run_id: &str) -> AppResult<RunReport> {
        let run = self.lifecycle.start_run(run_id)?;
        let config = self.effective_config(&run);

        let mut report = RunReport {
            run_id: run_id.to_string(),
            ..Default::default()
        };

        match self.process(&run, &config, &mut report).await {
            Ok(()) => {
                match self.lifecycle.complete_run(run_id) {
                    Ok(run) => report.final_status = Some(run.status),
                    Err(e) => error!("[Analysis] Could not record completion of run {}: {}", run_id, e),
                }
                info!(
                    "[Analysis] Run {} processed {} batches, {} proposals",
                    run_id, report.batches_processed, report.proposals_created
                );
                Ok(report)
            }
            Err(e) => {
                let message = e.detail();
                if let Err(fail_err) = self.lifecycle.fail_run(run_id, &message) {
                    error!("[Analysis] Could not record failure of run {}: {}", run_id, fail_err);
                }
                Err(AppError::execution(message))
            }
        }
    }

    /// Config captured on the run, or the orchestrator's own when the snapshot is unusable
    fn effective_config(&self, run: &AnalysisRun) -> AnalysisConfig {
        AnalysisConfig::from_snapshot(&run.config_snapshot).unwrap_or_else(|| {
            warn!(
                "[Analysis] Run {} has no usable config snapshot, using current config",
                run.id
            );
            self.config.clone()
        })
    }

    async fn process(
        &self,
        run: &AnalysisRun,
        config: &AnalysisConfig,
        report: &mut RunReport,
    ) -> AppResult<()> {
        let fetched = self.store.fetch(&run.time_window()).await?;
        report.messages_fetched = fetched.len();

        let messages = self.prefilter.apply(fetched);
        report.messages_analyzed = messages.len();
        self.lifecycle
            .record_message_counts(&run.id, report.messages_fetched, report.messages_analyzed)?;

        let arena = MessageArena::new(&messages);
        let groups = group_arena(&arena, config.idle_gap());
        debug!(
            "[Analysis] Run {} grouped {} messages into {} conversations",
            run.id,
            arena.len(),
            groups.len()
        );

        let batches = drain_batches(groups, &arena, config.max_batch_size)?;
        report.batches_total = batches.len();
        self.lifecycle.update_progress(&run.id, 0, batches.len())?;

        for (position, ids) in batches.iter().enumerate() {
            let batch_index = position + 1;
            let batch: Vec<Message> = ids.iter().filter_map(|id| arena.get(id).cloned()).collect();

            let rag_context = match &self.rag_source {
                Some(source) => source.context_for(&batch).await?,
                None => None,
            };
            let context = GenerationContext {
                analysis_run_id: run.id.clone(),
                batch_index,
                batch_total: batches.len(),
                project_context: config.project_context.clone(),
                rag_context,
            };

            let drafts = self.generator.generate(&batch, &context).await?;
            debug!(
                "[Analysis] Batch {}/{} of run {}: {} messages, {} drafts",
                batch_index,
                batches.len(),
                run.id,
                batch.len(),
                drafts.len()
            );

            for draft in drafts {
                let draft = anchor_draft(draft, &run.id, ids, &arena);
                self.ledger.create(draft)?;
                report.proposals_created += 1;
            }

            self.lifecycle.update_progress(&run.id, batch_index, batches.len())?;
            report.batches_processed = batch_index;
        }

        Ok(())
    }
}

/// Tie a generated draft to its run and batch.
///
/// Source ids outside the batch are dropped; a draft left without sources
/// claims the whole batch. The time span is recomputed from the messages.
fn anchor_draft(
    mut draft: ProposalDraft,
    run_id: &str,
    batch: &[MessageId],
    arena: &MessageArena<'_>,
) -> ProposalDraft {
    let in_batch: HashSet<&str> = batch.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut sources: Vec<MessageId> = draft
        .source_message_ids
        .into_iter()
        .filter(|id| in_batch.contains(id.as_str()) && seen.insert(id.clone()))
        .collect();
    if sources.is_empty() {
        sources = batch.to_vec();
    }

    draft.analysis_run_id = run_id.to_string();
    draft.time_span_seconds = arena.time_span_seconds(&sources);
    draft.source_message_ids = sources;
    draft
}
