//! Orchestrator Integration Tests
//!
//! Full analysis passes against in-memory SQLite with fake collaborators.
//! No LLM calls are made.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use convo_tasks::models::{AnalysisConfig, ProposalStatus, RunStatus};
use convo_tasks::services::analysis::{AnalysisOrchestrator, ChannelBroadcaster, NoopBroadcaster};
use convo_tasks::storage::database::Database;
use convo_tasks::utils::error::AppError;
use convo_tasks_core::{
    AnalysisEvent, CoreError, CoreResult, EventBroadcaster, GenerationContext, Message,
    MessageStore, PrefilterPolicy, ProposalDraft, ProposalGenerator, RagContextSource,
    StaticMessageStore, TimeWindow,
};

// ============================================================================
// Fakes
// ============================================================================

/// One draft per batch citing every message, recording the contexts it saw
#[derive(Default)]
struct RecordingGenerator {
    contexts: Mutex<Vec<GenerationContext>>,
    batches: Mutex<Vec<Vec<String>>>,
    fail_on_batch: Option<usize>,
}

#[async_trait]
impl ProposalGenerator for RecordingGenerator {
    async fn generate(
        &self,
        batch: &[Message],
        context: &GenerationContext,
    ) -> CoreResult<Vec<ProposalDraft>> {
        if self.fail_on_batch == Some(context.batch_index) {
            return Err(CoreError::execution("model quota exhausted"));
        }
        let ids: Vec<String> = batch.iter().map(|m| m.id.clone()).collect();
        self.contexts.lock().unwrap().push(context.clone());
        self.batches.lock().unwrap().push(ids.clone());
        Ok(vec![ProposalDraft::new(
            "ignored",
            format!("Batch {} follow-up", context.batch_index),
            0.7,
        )
        .with_sources(ids)])
    }
}

/// Cites a message that is not in the batch alongside a real one
struct StrayIdGenerator;

#[async_trait]
impl ProposalGenerator for StrayIdGenerator {
    async fn generate(
        &self,
        batch: &[Message],
        context: &GenerationContext,
    ) -> CoreResult<Vec<ProposalDraft>> {
        Ok(vec![ProposalDraft::new(&context.analysis_run_id, "Stray", 0.4)
            .with_sources(vec!["not-in-batch".into(), batch[0].id.clone()])])
    }
}

struct UnavailableStore;

#[async_trait]
impl MessageStore for UnavailableStore {
    async fn fetch(&self, _window: &TimeWindow) -> CoreResult<Vec<Message>> {
        Err(CoreError::execution("message store unreachable"))
    }
}

struct DropBots;

impl PrefilterPolicy for DropBots {
    fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .filter(|m| !m.content.starts_with("[bot]"))
            .collect()
    }
}

struct FixedRag;

#[async_trait]
impl RagContextSource for FixedRag {
    async fn context_for(&self, batch: &[Message]) -> CoreResult<Option<String>> {
        Ok(Some(format!("{} related docs", batch.len())))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

fn window() -> TimeWindow {
    TimeWindow::new(base() - Duration::hours(1), base() + Duration::hours(4)).unwrap()
}

/// Two channels with two conversations each, plus a bot message
fn sample_messages() -> Vec<Message> {
    let at = |minutes: i64| base() + Duration::minutes(minutes);
    vec![
        Message::new("a1", "deploy failed", at(0)).in_channel("ops"),
        Message::new("a2", "rolling back", at(3)).in_channel("ops"),
        Message::new("a3", "[bot] build #12 green", at(4)).in_channel("ops"),
        Message::new("a4", "postmortem tomorrow", at(90)).in_channel("ops"),
        Message::new("b1", "need review on PR", at(10)).in_channel("dev").in_thread("pr-7"),
        Message::new("b2", "looking now", at(12)).in_channel("dev").in_thread("pr-7"),
        Message::new("c1", "lunch?", at(20)),
    ]
}

fn orchestrator(
    db: &Database,
    broadcaster: Arc<dyn EventBroadcaster>,
    store: Arc<dyn MessageStore>,
    generator: Arc<dyn ProposalGenerator>,
) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(db.clone(), broadcaster, store, generator, AnalysisConfig::default())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_pass_uses_snapshot_config() {
    let db = Database::new_in_memory().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let orch = orchestrator(
        &db,
        Arc::new(NoopBroadcaster),
        Arc::new(StaticMessageStore::new(sample_messages())),
        generator.clone(),
    )
    .with_prefilter(Arc::new(DropBots))
    .with_rag_source(Arc::new(FixedRag));

    let snapshot = AnalysisConfig {
        max_batch_size: 2,
        project_context: Some("Checkout service".into()),
        ..Default::default()
    };
    let run = orch.lifecycle().create_run(window(), snapshot.to_snapshot()).unwrap();

    let report = orch.execute(&run.id).await.unwrap();
    assert_eq!(report.messages_fetched, 7);
    assert_eq!(report.messages_analyzed, 6);
    assert_eq!(report.final_status, Some(RunStatus::Completed));

    // every analyzed message was generated from exactly once, two at a time
    let batches = generator.batches.lock().unwrap().clone();
    assert!(batches.iter().all(|b| b.len() <= 2));
    let mut seen: Vec<String> = batches.concat();
    seen.sort();
    assert_eq!(seen, vec!["a1", "a2", "a4", "b1", "b2", "c1"]);

    let contexts = generator.contexts.lock().unwrap().clone();
    assert_eq!(contexts.len(), report.batches_total);
    for (i, context) in contexts.iter().enumerate() {
        assert_eq!(context.batch_index, i + 1);
        assert_eq!(context.batch_total, report.batches_total);
        assert_eq!(context.analysis_run_id, run.id);
        assert_eq!(context.project_context.as_deref(), Some("Checkout service"));
        assert!(context.rag_context.is_some());
    }

    let run = orch.lifecycle().get_run(&run.id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.batches_processed, run.batches_total);
    assert_eq!(run.messages_fetched, 7);
    assert_eq!(run.proposals_total, report.proposals_created as i64);
    assert_eq!(run.proposals_pending, run.proposals_total);

    // proposals are bound to this run whatever the generator claimed
    let proposals = orch.ledger().list_for_run(&run.id, None).unwrap();
    assert!(proposals.iter().all(|p| p.analysis_run_id == run.id));
    let ops = proposals
        .iter()
        .find(|p| p.source_message_ids == vec!["a1".to_string(), "a2".to_string()])
        .expect("ops conversation proposal");
    assert_eq!(ops.time_span_seconds, 180);
}

#[tokio::test]
async fn test_generator_failure_fails_run_and_keeps_earlier_proposals() {
    let db = Database::new_in_memory().unwrap();
    let generator = Arc::new(RecordingGenerator {
        fail_on_batch: Some(2),
        ..Default::default()
    });
    let orch = orchestrator(
        &db,
        Arc::new(NoopBroadcaster),
        Arc::new(StaticMessageStore::new(sample_messages())),
        generator,
    );
    let snapshot = AnalysisConfig {
        max_batch_size: 2,
        ..Default::default()
    };
    let run = orch.lifecycle().create_run(window(), snapshot.to_snapshot()).unwrap();

    let err = orch.execute(&run.id).await.unwrap_err();
    assert!(matches!(err, AppError::Execution(_)));
    assert_eq!(err.to_string(), "Execution error: model quota exhausted");

    let run = orch.lifecycle().get_run(&run.id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("model quota exhausted"));
    assert_eq!(run.batches_processed, 1);
    assert_eq!(run.proposals_total, 1);
    assert_eq!(
        orch.ledger()
            .list_for_run(&run.id, Some(ProposalStatus::Pending))
            .unwrap()
            .len(),
        1
    );

    // the failed run no longer blocks a new one
    assert!(orch.lifecycle().can_start_new_run().unwrap().0);
}

#[tokio::test]
async fn test_store_failure_fails_run() {
    let db = Database::new_in_memory().unwrap();
    let orch = orchestrator(
        &db,
        Arc::new(NoopBroadcaster),
        Arc::new(UnavailableStore),
        Arc::new(RecordingGenerator::default()),
    );
    let run = orch.lifecycle().create_run(window(), json!({})).unwrap();

    assert!(orch.execute(&run.id).await.is_err());
    let run = orch.lifecycle().get_run(&run.id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.unwrap().contains("message store unreachable"));
}

#[tokio::test]
async fn test_out_of_range_idle_gap_in_snapshot_falls_back() {
    let db = Database::new_in_memory().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let orch = orchestrator(
        &db,
        Arc::new(NoopBroadcaster),
        Arc::new(StaticMessageStore::new(sample_messages())),
        generator.clone(),
    );
    let snapshot = json!({"idle_gap_seconds": i64::MAX, "max_batch_size": 2});
    let run = orch.lifecycle().create_run(window(), snapshot).unwrap();

    let report = orch.spawn(run.id.clone()).await.unwrap().unwrap();
    assert_eq!(report.final_status, Some(RunStatus::Completed));

    // the whole snapshot is refused, so its batch size of 2 is ignored too
    let batches = generator.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 7);
    assert_eq!(
        orch.lifecycle().get_run(&run.id).unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_second_invocation_is_rejected() {
    let db = Database::new_in_memory().unwrap();
    let orch = orchestrator(
        &db,
        Arc::new(NoopBroadcaster),
        Arc::new(StaticMessageStore::new(sample_messages())),
        Arc::new(RecordingGenerator::default()),
    );
    let run = orch.lifecycle().create_run(window(), json!({})).unwrap();

    orch.execute(&run.id).await.unwrap();
    let err = orch.execute(&run.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(
        orch.lifecycle().get_run(&run.id).unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_empty_window_completes_without_batches() {
    let db = Database::new_in_memory().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let orch = orchestrator(
        &db,
        Arc::new(NoopBroadcaster),
        Arc::new(StaticMessageStore::new(Vec::new())),
        generator.clone(),
    );
    let run = orch.lifecycle().create_run(window(), json!("not a config")).unwrap();

    let report = orch.execute(&run.id).await.unwrap();
    assert_eq!(report.batches_total, 0);
    assert_eq!(report.proposals_created, 0);
    assert!(generator.contexts.lock().unwrap().is_empty());

    let closed = orch.lifecycle().close_run(&run.id).unwrap();
    assert_eq!(closed.status, RunStatus::Closed);
}

#[tokio::test]
async fn test_stray_source_ids_are_trimmed() {
    let db = Database::new_in_memory().unwrap();
    let orch = orchestrator(
        &db,
        Arc::new(NoopBroadcaster),
        Arc::new(StaticMessageStore::new(sample_messages())),
        Arc::new(StrayIdGenerator),
    );
    let run = orch.lifecycle().create_run(window(), json!({})).unwrap();
    orch.execute(&run.id).await.unwrap();

    let proposals = orch.ledger().list_for_run(&run.id, None).unwrap();
    assert!(!proposals.is_empty());
    for proposal in proposals {
        assert_eq!(proposal.message_count, 1);
        assert!(!proposal.source_message_ids.contains(&"not-in-batch".to_string()));
    }
}

#[tokio::test]
async fn test_spawned_pass_publishes_events_in_order() {
    let db = Database::new_in_memory().unwrap();
    let broadcaster = Arc::new(ChannelBroadcaster::new(64));
    let mut rx = broadcaster.subscribe();
    let orch = orchestrator(
        &db,
        broadcaster.clone(),
        Arc::new(StaticMessageStore::new(sample_messages())),
        Arc::new(RecordingGenerator::default()),
    );
    let run = orch.lifecycle().create_run(window(), json!({})).unwrap();

    let report = orch.spawn(run.id.clone()).await.unwrap().unwrap();

    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    assert!(matches!(events.first(), Some(AnalysisEvent::RunCreated { .. })));
    assert!(matches!(events.get(1), Some(AnalysisEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(AnalysisEvent::RunCompleted { proposals_total, .. }) if *proposals_total == report.proposals_created as i64
    ));

    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            AnalysisEvent::RunProgress { batch_index, .. } => Some(*batch_index),
            _ => None,
        })
        .collect();
    let expected: Vec<usize> = (0..=report.batches_total).collect();
    assert_eq!(progress, expected);

    let created = events
        .iter()
        .filter(|e| matches!(e, AnalysisEvent::ProposalCreated { .. }))
        .count();
    assert_eq!(created, report.proposals_created);
    assert!(events.iter().all(|e| e.run_id() == run.id));
}
