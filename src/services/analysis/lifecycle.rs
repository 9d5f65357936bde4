//! Run Lifecycle Manager
//!
//! Owns the analysis run state machine:
//!
//! ```text
//! pending -> running -> completed -> closed
//!                    \-> failed
//! ```
//!
//! Every transition reads, checks and writes the run inside one `IMMEDIATE`
//! transaction, and the UPDATE itself is conditional on the expected status.
//! Events are published after the transaction commits.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use convo_tasks_core::{AnalysisEvent, EventBroadcaster, TimeWindow, RUN_TOPIC};

use crate::models::{AnalysisRun, RunStatus};
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};

use super::metrics::compute_accuracy_metrics;

#[derive(Clone)]
pub struct RunLifecycleManager {
    db: Database,
    broadcaster: Arc<dyn EventBroadcaster>,
}

impl RunLifecycleManager {
    pub fn new(db: Database, broadcaster: Arc<dyn EventBroadcaster>) -> Self {
        Self { db, broadcaster }
    }

    /// Create a pending run for a time window.
    ///
    /// Fails with Conflict while another run is pending, running or completed.
    pub fn create_run(
        &self,
        window: TimeWindow,
        config_snapshot: serde_json::Value,
    ) -> AppResult<AnalysisRun> {
        window.validate()?;

        let now = Utc::now();
        let run = AnalysisRun {
            id: uuid::Uuid::new_v4().to_string(),
            status: RunStatus::Pending,
            time_window_start: window.start,
            time_window_end: window.end,
            config_snapshot,
            proposals_total: 0,
            proposals_pending: 0,
            proposals_approved: 0,
            proposals_rejected: 0,
            proposals_merged: 0,
            batches_processed: 0,
            batches_total: 0,
            messages_fetched: 0,
            messages_analyzed: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            closed_at: None,
            error_message: None,
            accuracy_metrics: None,
        };

        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(existing) = Database::fetch_unclosed_run(&tx)? {
            return Err(unclosed_conflict(&existing));
        }
        Database::insert_run(&tx, &run).map_err(|e| {
            if e.is_unique_violation() {
                AppError::conflict("Another analysis run is still open")
            } else {
                e
            }
        })?;
        tx.commit()?;

        info!(
            "[Analysis] Created run {} for window {} .. {}",
            run.id, run.time_window_start, run.time_window_end
        );
        self.broadcaster.notify(
            RUN_TOPIC,
            AnalysisEvent::RunCreated {
                run_id: run.id.clone(),
            },
        );
        Ok(run)
    }

    /// Whether a new run may be created, with the reason when it may not
    pub fn can_start_new_run(&self) -> AppResult<(bool, Option<String>)> {
        match self.db.get_unclosed_run()? {
            Some(run) => Ok((
                false,
                Some(format!(
                    "Analysis run {} is still {}; close it before starting another",
                    run.id, run.status
                )),
            )),
            None => Ok((true, None)),
        }
    }

    /// pending -> running
    pub fn start_run(&self, id: &str) -> AppResult<AnalysisRun> {
        let run = self.transition(id, RunStatus::Running, |_, _| Ok(()))?;
        info!("[Analysis] Started run {}", id);
        self.broadcaster.notify(
            RUN_TOPIC,
            AnalysisEvent::RunStarted {
                run_id: id.to_string(),
            },
        );
        Ok(run)
    }

    /// Record batch progress. Only allowed while the run is running.
    pub fn update_progress(&self, id: &str, batch_index: usize, batch_total: usize) -> AppResult<()> {
        let conn = self.db.get_connection()?;
        if !Database::update_run_progress(&conn, id, batch_index as i64, batch_total as i64)? {
            return Err(not_running(&conn, id)?);
        }
        self.broadcaster.notify(
            RUN_TOPIC,
            AnalysisEvent::RunProgress {
                run_id: id.to_string(),
                batch_index,
                batch_total,
            },
        );
        Ok(())
    }

    /// Record how many messages were fetched and how many survived prefiltering
    pub fn record_message_counts(&self, id: &str, fetched: usize, analyzed: usize) -> AppResult<()> {
        let conn = self.db.get_connection()?;
        if !Database::update_run_message_counts(&conn, id, fetched as i64, analyzed as i64)? {
            return Err(not_running(&conn, id)?);
        }
        Ok(())
    }

    /// running -> completed
    pub fn complete_run(&self, id: &str) -> AppResult<AnalysisRun> {
        let run = self.transition(id, RunStatus::Completed, |_, _| Ok(()))?;
        info!(
            "[Analysis] Completed run {} with {} proposals",
            id, run.proposals_total
        );
        self.broadcaster.notify(
            RUN_TOPIC,
            AnalysisEvent::RunCompleted {
                run_id: id.to_string(),
                proposals_total: run.proposals_total,
            },
        );
        Ok(run)
    }

    /// running -> failed, storing the error message.
    ///
    /// Calling this on a run that already failed returns it unchanged.
    pub fn fail_run(&self, id: &str, message: &str) -> AppResult<AnalysisRun> {
        if let Some(run) = self.db.get_run(id)? {
            if run.status == RunStatus::Failed {
                return Ok(run);
            }
        }

        let run = self.transition(id, RunStatus::Failed, |conn, _| {
            Database::set_run_error(conn, id, message)
        })?;
        tracing::warn!("[Analysis] Run {} failed: {}", id, message);
        self.broadcaster.notify(
            RUN_TOPIC,
            AnalysisEvent::RunFailed {
                run_id: id.to_string(),
                error: message.to_string(),
            },
        );
        Ok(run)
    }

    /// completed -> closed. Requires every proposal to be reviewed and stores
    /// the accuracy metrics in the same transaction.
    pub fn close_run(&self, id: &str) -> AppResult<AnalysisRun> {
        let run = self.transition(id, RunStatus::Closed, |conn, run| {
            if run.proposals_pending > 0 {
                return Err(AppError::validation(format!(
                    "Run {} still has {} pending proposals",
                    id, run.proposals_pending
                )));
            }
            let proposals = Database::query_proposals(conn, id, None)?;
            let metrics = compute_accuracy_metrics(&proposals, Utc::now());
            Database::set_run_metrics(conn, id, &metrics)
        })?;
        info!("[Analysis] Closed run {}", id);
        self.broadcaster.notify(
            RUN_TOPIC,
            AnalysisEvent::RunClosed {
                run_id: id.to_string(),
            },
        );
        Ok(run)
    }

    pub fn get_run(&self, id: &str) -> AppResult<AnalysisRun> {
        self.db
            .get_run(id)?
            .ok_or_else(|| AppError::not_found(format!("Analysis run not found: {}", id)))
    }

    pub fn list_runs(&self, limit: usize) -> AppResult<Vec<AnalysisRun>> {
        self.db.list_runs(limit)
    }

    pub fn current_unclosed_run(&self) -> AppResult<Option<AnalysisRun>> {
        self.db.get_unclosed_run()
    }

    /// Move a run to `to` from its current status, running `before` inside the
    /// transaction once the edge has been checked.
    fn transition<F>(&self, id: &str, to: RunStatus, before: F) -> AppResult<AnalysisRun>
    where
        F: FnOnce(&Connection, &AnalysisRun) -> AppResult<()>,
    {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let run = load_run(&tx, id)?;
        if !run.status.can_transition_to(to) {
            return Err(AppError::conflict(format!(
                "Cannot move analysis run {} from {} to {}",
                id, run.status, to
            )));
        }
        before(&tx, &run)?;
        if !Database::transition_run(&tx, id, run.status, to, Utc::now())? {
            return Err(AppError::conflict(format!(
                "Analysis run {} changed status concurrently",
                id
            )));
        }
        let updated = load_run(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }
}

fn load_run(conn: &Connection, id: &str) -> AppResult<AnalysisRun> {
    Database::fetch_run(conn, id)?
        .ok_or_else(|| AppError::not_found(format!("Analysis run not found: {}", id)))
}

fn not_running(conn: &Connection, id: &str) -> AppResult<AppError> {
    let run = load_run(conn, id)?;
    Ok(AppError::conflict(format!(
        "Analysis run {} is {}, not running",
        id, run.status
    )))
}

fn unclosed_conflict(existing: &AnalysisRun) -> AppError {
    AppError::conflict(format!(
        "Analysis run {} is still {}; close it before starting another",
        existing.id, existing.status
    ))
}
