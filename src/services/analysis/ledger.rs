//! Proposal Ledger
//!
//! Creates and reviews task proposals. Each operation changes the proposal
//! row and the owning run's counters in one `IMMEDIATE` transaction, so after
//! every call `pending + approved + rejected + merged == total` holds for the run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};

use convo_tasks_core::{AnalysisEvent, EventBroadcaster, ProposalDraft, PROPOSAL_TOPIC};

use crate::models::{ProposalStatus, ProposalUpdate, ReviewAction, RunStatus, TaskProposal};
use crate::storage::database::{CounterDelta, Database};
use crate::utils::error::{AppError, AppResult};

#[derive(Clone)]
pub struct ProposalLedger {
    db: Database,
    broadcaster: Arc<dyn EventBroadcaster>,
}

impl ProposalLedger {
    pub fn new(db: Database, broadcaster: Arc<dyn EventBroadcaster>) -> Self {
        Self { db, broadcaster }
    }

    /// Persist a draft as a pending proposal and count it on its run
    pub fn create(&self, draft: ProposalDraft) -> AppResult<TaskProposal> {
        draft.validate()?;

        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let run = Database::fetch_run(&tx, &draft.analysis_run_id)?.ok_or_else(|| {
            AppError::not_found(format!("Analysis run not found: {}", draft.analysis_run_id))
        })?;
        if matches!(run.status, RunStatus::Closed | RunStatus::Failed) {
            return Err(AppError::conflict(format!(
                "Analysis run {} is {} and accepts no new proposals",
                run.id, run.status
            )));
        }

        let now = Utc::now();
        let proposal = TaskProposal {
            id: uuid::Uuid::new_v4().to_string(),
            analysis_run_id: draft.analysis_run_id,
            proposed_title: draft.title.trim().to_string(),
            proposed_description: draft.description,
            proposed_priority: draft.priority,
            proposed_category: draft.category,
            proposed_tags: draft.tags,
            message_count: draft.source_message_ids.len() as i64,
            source_message_ids: draft.source_message_ids,
            time_span_seconds: draft.time_span_seconds,
            confidence: draft.confidence,
            llm_recommendation: draft.recommendation,
            reasoning: draft.reasoning,
            status: ProposalStatus::Pending,
            review_action: None,
            review_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            merged_into_id: None,
            created_at: now,
            updated_at: now,
        };

        Database::insert_proposal(&tx, &proposal)?;
        Database::adjust_run_counters(&tx, &proposal.analysis_run_id, CounterDelta::created())?;
        tx.commit()?;

        tracing::debug!(
            "[Ledger] Created proposal {} for run {}",
            proposal.id,
            proposal.analysis_run_id
        );
        self.broadcaster.notify(
            PROPOSAL_TOPIC,
            AnalysisEvent::ProposalCreated {
                run_id: proposal.analysis_run_id.clone(),
                proposal_id: proposal.id.clone(),
            },
        );
        Ok(proposal)
    }

    /// pending -> approved. Approving an approved proposal changes nothing.
    pub fn approve(&self, id: &str, reviewer: Option<&str>) -> AppResult<TaskProposal> {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut proposal = load_proposal(&tx, id)?;
        if proposal.status == ProposalStatus::Approved {
            tracing::debug!("[Ledger] Proposal {} already approved", id);
            return Ok(proposal);
        }
        ensure_pending(&proposal, ReviewAction::Approve)?;

        settle(&tx, &mut proposal, ReviewAction::Approve, None, reviewer, Utc::now())?;
        tx.commit()?;

        self.notify_reviewed(&proposal);
        Ok(proposal)
    }

    /// pending -> rejected. The reason is required and kept as the review notes.
    pub fn reject(&self, id: &str, reason: &str, reviewer: Option<&str>) -> AppResult<TaskProposal> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("A rejection reason is required"));
        }

        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut proposal = load_proposal(&tx, id)?;
        ensure_pending(&proposal, ReviewAction::Reject)?;

        settle(
            &tx,
            &mut proposal,
            ReviewAction::Reject,
            Some(reason),
            reviewer,
            Utc::now(),
        )?;
        tx.commit()?;

        self.notify_reviewed(&proposal);
        Ok(proposal)
    }

    /// pending -> merged into `target_id`.
    ///
    /// The target must be another proposal of the same run that is still
    /// pending or approved. It absorbs the source's message ids.
    pub fn merge(&self, id: &str, target_id: &str, reviewer: Option<&str>) -> AppResult<TaskProposal> {
        if id == target_id {
            return Err(AppError::validation("A proposal cannot be merged into itself"));
        }

        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut proposal = load_proposal(&tx, id)?;
        ensure_pending(&proposal, ReviewAction::Merge)?;

        let mut target = load_proposal(&tx, target_id)?;
        if target.analysis_run_id != proposal.analysis_run_id {
            return Err(AppError::validation(format!(
                "Proposal {} belongs to a different analysis run",
                target_id
            )));
        }
        if matches!(target.status, ProposalStatus::Rejected | ProposalStatus::Merged) {
            return Err(AppError::conflict(format!(
                "Cannot merge into proposal {} because it is {}",
                target_id, target.status
            )));
        }

        let now = Utc::now();
        let mut seen: HashSet<String> = target.source_message_ids.iter().cloned().collect();
        for message_id in &proposal.source_message_ids {
            if seen.insert(message_id.clone()) {
                target.source_message_ids.push(message_id.clone());
            }
        }
        target.message_count = target.source_message_ids.len() as i64;
        target.updated_at = now;
        Database::write_proposal(&tx, &target)?;

        proposal.merged_into_id = Some(target.id.clone());
        settle(&tx, &mut proposal, ReviewAction::Merge, None, reviewer, now)?;
        tx.commit()?;

        self.notify_reviewed(&proposal);
        self.broadcaster.notify(
            PROPOSAL_TOPIC,
            AnalysisEvent::ProposalUpdated {
                run_id: target.analysis_run_id.clone(),
                proposal_id: target.id.clone(),
            },
        );
        Ok(proposal)
    }

    /// Edit the content of a proposal. Status and counters are untouched.
    pub fn update(&self, id: &str, fields: ProposalUpdate) -> AppResult<TaskProposal> {
        if let Some(title) = &fields.title {
            if title.trim().is_empty() {
                return Err(AppError::validation("Proposal title must not be empty"));
            }
        }

        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut proposal = load_proposal(&tx, id)?;
        if fields.is_empty() {
            return Ok(proposal);
        }
        if proposal.status != ProposalStatus::Pending {
            tracing::warn!(
                "[Ledger] Updating proposal {} which is already {}",
                id,
                proposal.status
            );
        }

        fields.apply_to(&mut proposal);
        proposal.updated_at = Utc::now();
        Database::write_proposal(&tx, &proposal)?;
        tx.commit()?;

        self.broadcaster.notify(
            PROPOSAL_TOPIC,
            AnalysisEvent::ProposalUpdated {
                run_id: proposal.analysis_run_id.clone(),
                proposal_id: proposal.id.clone(),
            },
        );
        Ok(proposal)
    }

    pub fn get(&self, id: &str) -> AppResult<TaskProposal> {
        self.db
            .get_proposal(id)?
            .ok_or_else(|| AppError::not_found(format!("Proposal not found: {}", id)))
    }

    /// Proposals of a run in creation order, optionally filtered by status
    pub fn list_for_run(
        &self,
        run_id: &str,
        status: Option<ProposalStatus>,
    ) -> AppResult<Vec<TaskProposal>> {
        let conn = self.db.get_connection()?;
        if Database::fetch_run(&conn, run_id)?.is_none() {
            return Err(AppError::not_found(format!("Analysis run not found: {}", run_id)));
        }
        Database::query_proposals(&conn, run_id, status)
    }

    fn notify_reviewed(&self, proposal: &TaskProposal) {
        self.broadcaster.notify(
            PROPOSAL_TOPIC,
            AnalysisEvent::ProposalReviewed {
                run_id: proposal.analysis_run_id.clone(),
                proposal_id: proposal.id.clone(),
                status: proposal.status.to_string(),
            },
        );
    }
}

fn load_proposal(conn: &Connection, id: &str) -> AppResult<TaskProposal> {
    Database::fetch_proposal(conn, id)?
        .ok_or_else(|| AppError::not_found(format!("Proposal not found: {}", id)))
}

fn ensure_pending(proposal: &TaskProposal, action: ReviewAction) -> AppResult<()> {
    if proposal.status == ProposalStatus::Pending {
        return Ok(());
    }
    Err(AppError::conflict(format!(
        "Cannot {} proposal {} because it is already {}",
        action, proposal.id, proposal.status
    )))
}

/// Record the review on the proposal and move the run counters with it
fn settle(
    conn: &Connection,
    proposal: &mut TaskProposal,
    action: ReviewAction,
    notes: Option<&str>,
    reviewer: Option<&str>,
    at: DateTime<Utc>,
) -> AppResult<()> {
    let status = action.resulting_status();
    proposal.status = status;
    proposal.review_action = Some(action);
    proposal.review_notes = notes.map(str::to_string);
    proposal.reviewed_by = reviewer.map(str::to_string);
    proposal.reviewed_at = Some(at);
    proposal.updated_at = at;

    Database::write_proposal(conn, proposal)?;
    Database::adjust_run_counters(conn, &proposal.analysis_run_id, CounterDelta::reviewed(status))
}
