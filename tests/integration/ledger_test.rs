//! Proposal Ledger Integration Tests
//!
//! Counter bookkeeping across mixed review sequences, and the close gate that
//! depends on it.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use convo_tasks::models::{ProposalStatus, ProposalUpdate, RunStatus};
use convo_tasks::services::analysis::{NoopBroadcaster, ProposalLedger, RunLifecycleManager};
use convo_tasks::storage::database::Database;
use convo_tasks::utils::error::AppError;
use convo_tasks_core::{EventBroadcaster, ProposalDraft, TaskPriority, TimeWindow};

// ============================================================================
// Helpers
// ============================================================================

struct Fixture {
    lifecycle: RunLifecycleManager,
    ledger: ProposalLedger,
    run_id: String,
}

fn running_fixture() -> Fixture {
    let db = Database::new_in_memory().expect("Failed to create in-memory test database");
    let broadcaster: Arc<dyn EventBroadcaster> = Arc::new(NoopBroadcaster);
    let lifecycle = RunLifecycleManager::new(db.clone(), broadcaster.clone());
    let ledger = ProposalLedger::new(db, broadcaster);

    let end = Utc::now();
    let run = lifecycle
        .create_run(TimeWindow::new(end - Duration::hours(3), end).unwrap(), json!({}))
        .unwrap();
    lifecycle.start_run(&run.id).unwrap();

    Fixture {
        lifecycle,
        ledger,
        run_id: run.id,
    }
}

fn draft(run_id: &str, n: usize) -> ProposalDraft {
    ProposalDraft::new(run_id, format!("Task {}", n), 0.5)
        .with_sources(vec![format!("m{}", n)])
        .with_priority(TaskPriority::Low)
}

fn assert_conserved(fixture: &Fixture) {
    let run = fixture.lifecycle.get_run(&fixture.run_id).unwrap();
    let counters = run.counters();
    assert!(counters.is_conserved(), "counters drifted: {:?}", counters);
    assert!(counters.pending >= 0);

    let stored = fixture.ledger.list_for_run(&fixture.run_id, None).unwrap();
    assert_eq!(stored.len() as i64, counters.total);
    let pending = stored
        .iter()
        .filter(|p| p.status == ProposalStatus::Pending)
        .count() as i64;
    assert_eq!(pending, counters.pending);
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_conservation_across_mixed_reviews() {
    let fixture = running_fixture();
    let ids: Vec<String> = (0..12)
        .map(|n| fixture.ledger.create(draft(&fixture.run_id, n)).unwrap().id)
        .collect();
    assert_conserved(&fixture);

    for (n, id) in ids.iter().enumerate() {
        match n % 4 {
            0 => {
                fixture.ledger.approve(id, Some("ana")).unwrap();
            }
            1 => {
                fixture.ledger.reject(id, "not actionable", None).unwrap();
            }
            2 => {
                fixture.ledger.merge(id, &ids[0], None).unwrap();
            }
            _ => {}
        }
        assert_conserved(&fixture);
    }

    // failed and repeated operations leave the counters alone
    let _ = fixture.ledger.approve(&ids[0], None);
    let _ = fixture.ledger.reject(&ids[1], "again", None);
    let _ = fixture.ledger.reject(&ids[3], "", None);
    let _ = fixture.ledger.merge(&ids[5], &ids[1], None);
    assert_conserved(&fixture);

    let run = fixture.lifecycle.get_run(&fixture.run_id).unwrap();
    assert_eq!(run.proposals_total, 12);
    assert_eq!(run.proposals_approved, 3);
    assert_eq!(run.proposals_rejected, 3);
    assert_eq!(run.proposals_merged, 3);
    assert_eq!(run.proposals_pending, 3);
}

#[test]
fn test_repeated_approve_never_goes_negative() {
    let fixture = running_fixture();
    let proposal = fixture.ledger.create(draft(&fixture.run_id, 1)).unwrap();
    for _ in 0..5 {
        fixture.ledger.approve(&proposal.id, None).unwrap();
    }
    let run = fixture.lifecycle.get_run(&fixture.run_id).unwrap();
    assert_eq!(run.proposals_pending, 0);
    assert_eq!(run.proposals_approved, 1);
}

#[test]
fn test_empty_reason_leaves_counters_unchanged() {
    let fixture = running_fixture();
    let proposal = fixture.ledger.create(draft(&fixture.run_id, 1)).unwrap();
    let before = fixture.lifecycle.get_run(&fixture.run_id).unwrap().counters();

    assert!(matches!(
        fixture.ledger.reject(&proposal.id, "", None),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        fixture.ledger.reject(&proposal.id, " \t\n", None),
        Err(AppError::Validation(_))
    ));

    let after = fixture.lifecycle.get_run(&fixture.run_id).unwrap().counters();
    assert_eq!(before, after);
    assert_eq!(
        fixture.ledger.get(&proposal.id).unwrap().status,
        ProposalStatus::Pending
    );
}

#[test]
fn test_close_gate_follows_reviews() {
    let fixture = running_fixture();
    let a = fixture.ledger.create(draft(&fixture.run_id, 1)).unwrap();
    let b = fixture.ledger.create(draft(&fixture.run_id, 2)).unwrap();
    fixture.lifecycle.complete_run(&fixture.run_id).unwrap();

    fixture.ledger.approve(&a.id, None).unwrap();
    assert!(matches!(
        fixture.lifecycle.close_run(&fixture.run_id),
        Err(AppError::Validation(_))
    ));

    fixture.ledger.merge(&b.id, &a.id, Some("kim")).unwrap();
    let closed = fixture.lifecycle.close_run(&fixture.run_id).unwrap();
    assert_eq!(closed.status, RunStatus::Closed);

    let metrics = closed.accuracy_metrics.unwrap();
    assert_eq!(metrics.total_proposals, 2);
    assert_eq!(metrics.approved, 1);
    assert_eq!(metrics.merged, 1);

    // a closed run takes no new proposals
    assert!(matches!(
        fixture.ledger.create(draft(&fixture.run_id, 3)),
        Err(AppError::Conflict(_))
    ));
}

#[test]
fn test_update_keeps_status_and_counters() {
    let fixture = running_fixture();
    let proposal = fixture.ledger.create(draft(&fixture.run_id, 1)).unwrap();

    let updated = fixture
        .ledger
        .update(
            &proposal.id,
            ProposalUpdate {
                description: Some("Owner: platform team".into()),
                priority: Some(TaskPriority::Critical),
                tags: Some(vec!["infra".into()]),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.proposed_priority, TaskPriority::Critical);
    assert_eq!(updated.status, ProposalStatus::Pending);
    assert_eq!(updated.analysis_run_id, fixture.run_id);
    assert_conserved(&fixture);

    assert!(matches!(
        fixture.ledger.update("missing", ProposalUpdate::default()),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn test_list_filters_by_status() {
    let fixture = running_fixture();
    let a = fixture.ledger.create(draft(&fixture.run_id, 1)).unwrap();
    fixture.ledger.create(draft(&fixture.run_id, 2)).unwrap();
    fixture.ledger.reject(&a.id, "out of scope", Some("li")).unwrap();

    let rejected = fixture
        .ledger
        .list_for_run(&fixture.run_id, Some(ProposalStatus::Rejected))
        .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].reviewed_by.as_deref(), Some("li"));
    assert!(rejected[0].reviewed_at.is_some());

    assert!(matches!(
        fixture.ledger.list_for_run("missing", None),
        Err(AppError::NotFound(_))
    ));
}
