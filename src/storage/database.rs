//! SQLite Database
//!
//! Embedded database for persistent storage using rusqlite with r2d2 connection pooling.
//!
//! Row-level helpers take a `&Connection` so callers can run several of them
//! inside one transaction. Two storage guarantees are relied on elsewhere:
//!
//! - the partial unique index `idx_analysis_runs_single_unclosed` admits at most
//!   one run whose status is pending, running or completed
//! - counter updates go through [`Database::adjust_run_counters`], which floors
//!   `proposals_pending` at zero in SQL

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use convo_tasks_core::{ReviewRecommendation, TaskPriority};

use crate::models::{
    AccuracyMetrics, AnalysisRun, ProposalStatus, ReviewAction, RunStatus, TaskProposal,
};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Name of the index enforcing the single-unclosed-run rule
pub const SINGLE_UNCLOSED_RUN_INDEX: &str = "idx_analysis_runs_single_unclosed";

const RUN_COLUMNS: &str = "id, status, time_window_start, time_window_end, config_snapshot,
    proposals_total, proposals_pending, proposals_approved, proposals_rejected, proposals_merged,
    batches_processed, batches_total, messages_fetched, messages_analyzed,
    created_at, updated_at, started_at, completed_at, closed_at, error_message, accuracy_metrics";

const PROPOSAL_COLUMNS: &str = "id, analysis_run_id, proposed_title, proposed_description,
    proposed_priority, proposed_category, proposed_tags, source_message_ids, message_count,
    time_span_seconds, confidence, llm_recommendation, reasoning, status, review_action,
    review_notes, reviewed_by, reviewed_at, merged_into_id, created_at, updated_at";

/// Signed changes applied to a run's proposal counters in one statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub merged: i64,
}

impl CounterDelta {
    /// A new pending proposal
    pub fn created() -> Self {
        Self {
            total: 1,
            pending: 1,
            ..Default::default()
        }
    }

    /// A pending proposal leaving the queue with the given outcome
    pub fn reviewed(outcome: ProposalStatus) -> Self {
        let mut delta = Self {
            pending: -1,
            ..Default::default()
        };
        match outcome {
            ProposalStatus::Approved => delta.approved = 1,
            ProposalStatus::Rejected => delta.rejected = 1,
            ProposalStatus::Merged => delta.merged = 1,
            ProposalStatus::Pending => delta.pending = 0,
        }
        delta
    }
}

/// Format a timestamp the way every TEXT time column stores it
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool) -> AppResult<Self> {
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// Every pooled in-memory connection is a separate database, so the pool
    /// holds exactly one connection.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool)
    }

    /// Open the database at the default location (~/.convo-tasks/data.db)
    pub fn new() -> AppResult<Self> {
        let db_path = database_path()?;
        Self::open(&db_path)
    }

    /// Open (or create) a database file with connection pooling
    pub fn open(db_path: &Path) -> AppResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS analysis_runs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'running', 'completed', 'failed', 'closed')),
                time_window_start TEXT NOT NULL,
                time_window_end TEXT NOT NULL,
                config_snapshot TEXT NOT NULL DEFAULT '{}',
                proposals_total INTEGER NOT NULL DEFAULT 0 CHECK (proposals_total >= 0),
                proposals_pending INTEGER NOT NULL DEFAULT 0 CHECK (proposals_pending >= 0),
                proposals_approved INTEGER NOT NULL DEFAULT 0 CHECK (proposals_approved >= 0),
                proposals_rejected INTEGER NOT NULL DEFAULT 0 CHECK (proposals_rejected >= 0),
                proposals_merged INTEGER NOT NULL DEFAULT 0 CHECK (proposals_merged >= 0),
                batches_processed INTEGER NOT NULL DEFAULT 0,
                batches_total INTEGER NOT NULL DEFAULT 0,
                messages_fetched INTEGER NOT NULL DEFAULT 0,
                messages_analyzed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                closed_at TEXT,
                error_message TEXT,
                accuracy_metrics TEXT
            )",
            [],
        )?;

        // At most one run may be pending, running or completed at a time.
        // Every row covered by the partial index has the same key, so a second
        // unclosed row violates uniqueness.
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON analysis_runs ((status <> 'closed'))
                 WHERE status IN ('pending', 'running', 'completed')",
                SINGLE_UNCLOSED_RUN_INDEX
            ),
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_analysis_runs_created_at ON analysis_runs(created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS task_proposals (
                id TEXT PRIMARY KEY,
                analysis_run_id TEXT NOT NULL,
                proposed_title TEXT NOT NULL,
                proposed_description TEXT NOT NULL DEFAULT '',
                proposed_priority TEXT NOT NULL DEFAULT 'medium',
                proposed_category TEXT,
                proposed_tags TEXT NOT NULL DEFAULT '[]',
                source_message_ids TEXT NOT NULL,
                message_count INTEGER NOT NULL CHECK (message_count > 0),
                time_span_seconds INTEGER NOT NULL DEFAULT 0,
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                llm_recommendation TEXT NOT NULL DEFAULT 'review',
                reasoning TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected', 'merged')),
                review_action TEXT,
                review_notes TEXT,
                reviewed_by TEXT,
                reviewed_at TEXT,
                merged_into_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (analysis_run_id) REFERENCES analysis_runs(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_task_proposals_run ON task_proposals(analysis_run_id, status)",
            [],
        )?;

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Get the connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Check if the database is healthy
    pub fn is_healthy(&self) -> bool {
        if let Ok(conn) = self.pool.get() {
            conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
        } else {
            false
        }
    }

    // ========================================================================
    // Pooled reads
    // ========================================================================

    /// Get a single run by ID
    pub fn get_run(&self, id: &str) -> AppResult<Option<AnalysisRun>> {
        let conn = self.get_connection()?;
        Self::fetch_run(&conn, id)
    }

    /// Most recent runs first
    pub fn list_runs(&self, limit: usize) -> AppResult<Vec<AnalysisRun>> {
        let conn = self.get_connection()?;
        Self::query_runs(&conn, limit)
    }

    /// The run currently holding the unclosed slot, if any
    pub fn get_unclosed_run(&self) -> AppResult<Option<AnalysisRun>> {
        let conn = self.get_connection()?;
        Self::fetch_unclosed_run(&conn)
    }

    /// Get a single proposal by ID
    pub fn get_proposal(&self, id: &str) -> AppResult<Option<TaskProposal>> {
        let conn = self.get_connection()?;
        Self::fetch_proposal(&conn, id)
    }

    /// Proposals of a run in creation order, optionally filtered by status
    pub fn list_proposals(
        &self,
        run_id: &str,
        status: Option<ProposalStatus>,
    ) -> AppResult<Vec<TaskProposal>> {
        let conn = self.get_connection()?;
        Self::query_proposals(&conn, run_id, status)
    }

    // ========================================================================
    // Analysis Run Operations
    // ========================================================================

    /// Insert a new run record
    pub fn insert_run(conn: &Connection, run: &AnalysisRun) -> AppResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO analysis_runs ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                RUN_COLUMNS
            ),
            params![
                run.id,
                run.status.as_str(),
                timestamp(run.time_window_start),
                timestamp(run.time_window_end),
                serde_json::to_string(&run.config_snapshot)?,
                run.proposals_total,
                run.proposals_pending,
                run.proposals_approved,
                run.proposals_rejected,
                run.proposals_merged,
                run.batches_processed,
                run.batches_total,
                run.messages_fetched,
                run.messages_analyzed,
                timestamp(run.created_at),
                timestamp(run.updated_at),
                run.started_at.map(timestamp),
                run.completed_at.map(timestamp),
                run.closed_at.map(timestamp),
                run.error_message,
                run.accuracy_metrics
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;
        Ok(())
    }

    /// Read a run by ID
    pub fn fetch_run(conn: &Connection, id: &str) -> AppResult<Option<AnalysisRun>> {
        let run = conn
            .query_row(
                &format!("SELECT {} FROM analysis_runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Read the run holding the unclosed slot
    pub fn fetch_unclosed_run(conn: &Connection) -> AppResult<Option<AnalysisRun>> {
        let run = conn
            .query_row(
                &format!(
                    "SELECT {} FROM analysis_runs
                     WHERE status IN ('pending', 'running', 'completed')
                     ORDER BY created_at DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                [],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Read the most recent runs
    pub fn query_runs(conn: &Connection, limit: usize) -> AppResult<Vec<AnalysisRun>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM analysis_runs ORDER BY created_at DESC, id LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], Self::row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Move a run between statuses only if it is currently in `from`.
    ///
    /// Returns `false` when the run was not in `from` (or does not exist).
    pub fn transition_run(
        conn: &Connection,
        id: &str,
        from: RunStatus,
        to: RunStatus,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let column = match to {
            RunStatus::Running => Some("started_at"),
            RunStatus::Completed | RunStatus::Failed => Some("completed_at"),
            RunStatus::Closed => Some("closed_at"),
            RunStatus::Pending => None,
        };
        let sql = match column {
            Some(column) => format!(
                "UPDATE analysis_runs SET status = ?3, {} = ?4, updated_at = ?4
                 WHERE id = ?1 AND status = ?2",
                column
            ),
            None => "UPDATE analysis_runs SET status = ?3, updated_at = ?4
                     WHERE id = ?1 AND status = ?2"
                .to_string(),
        };
        let changed = conn.execute(
            &sql,
            params![id, from.as_str(), to.as_str(), timestamp(at)],
        )?;
        Ok(changed == 1)
    }

    /// Store the error message of a failed run
    pub fn set_run_error(conn: &Connection, id: &str, message: &str) -> AppResult<()> {
        conn.execute(
            "UPDATE analysis_runs SET error_message = ?2 WHERE id = ?1",
            params![id, message],
        )?;
        Ok(())
    }

    /// Store accuracy metrics on a run
    pub fn set_run_metrics(conn: &Connection, id: &str, metrics: &AccuracyMetrics) -> AppResult<()> {
        conn.execute(
            "UPDATE analysis_runs SET accuracy_metrics = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(metrics)?],
        )?;
        Ok(())
    }

    /// Update batch progress of a running run. Returns `false` if it is not running.
    pub fn update_run_progress(
        conn: &Connection,
        id: &str,
        batches_processed: i64,
        batches_total: i64,
    ) -> AppResult<bool> {
        let changed = conn.execute(
            "UPDATE analysis_runs SET batches_processed = ?2, batches_total = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, batches_processed, batches_total, timestamp(Utc::now())],
        )?;
        Ok(changed == 1)
    }

    /// Record how many messages were fetched and kept after prefiltering
    pub fn update_run_message_counts(
        conn: &Connection,
        id: &str,
        fetched: i64,
        analyzed: i64,
    ) -> AppResult<bool> {
        let changed = conn.execute(
            "UPDATE analysis_runs SET messages_fetched = ?2, messages_analyzed = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, fetched, analyzed, timestamp(Utc::now())],
        )?;
        Ok(changed == 1)
    }

    /// Apply a counter delta to a run. `proposals_pending` never drops below zero.
    pub fn adjust_run_counters(conn: &Connection, id: &str, delta: CounterDelta) -> AppResult<()> {
        let changed = conn.execute(
            "UPDATE analysis_runs SET
                proposals_total = proposals_total + ?2,
                proposals_pending = MAX(proposals_pending + ?3, 0),
                proposals_approved = proposals_approved + ?4,
                proposals_rejected = proposals_rejected + ?5,
                proposals_merged = proposals_merged + ?6,
                updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                delta.total,
                delta.pending,
                delta.approved,
                delta.rejected,
                delta.merged,
                timestamp(Utc::now())
            ],
        )?;
        if changed == 0 {
            return Err(AppError::not_found(format!("Analysis run not found: {}", id)));
        }
        Ok(())
    }

    fn row_to_run(row: &Row) -> rusqlite::Result<AnalysisRun> {
        let status: String = row.get(1)?;
        let status = RunStatus::from_str_value(&status)
            .ok_or_else(|| invalid_value(1, format!("unknown run status '{}'", status)))?;
        let config_snapshot: String = row.get(4)?;
        let accuracy_metrics: Option<String> = row.get(20)?;

        Ok(AnalysisRun {
            id: row.get(0)?,
            status,
            time_window_start: parse_timestamp(row, 2)?,
            time_window_end: parse_timestamp(row, 3)?,
            config_snapshot: parse_json(4, &config_snapshot)?,
            proposals_total: row.get(5)?,
            proposals_pending: row.get(6)?,
            proposals_approved: row.get(7)?,
            proposals_rejected: row.get(8)?,
            proposals_merged: row.get(9)?,
            batches_processed: row.get(10)?,
            batches_total: row.get(11)?,
            messages_fetched: row.get(12)?,
            messages_analyzed: row.get(13)?,
            created_at: parse_timestamp(row, 14)?,
            updated_at: parse_timestamp(row, 15)?,
            started_at: parse_optional_timestamp(row, 16)?,
            completed_at: parse_optional_timestamp(row, 17)?,
            closed_at: parse_optional_timestamp(row, 18)?,
            error_message: row.get(19)?,
            accuracy_metrics: accuracy_metrics
                .map(|json| parse_json(20, &json))
                .transpose()?,
        })
    }

    // ========================================================================
    // Task Proposal Operations
    // ========================================================================

    /// Insert a new proposal record
    pub fn insert_proposal(conn: &Connection, proposal: &TaskProposal) -> AppResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO task_proposals ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                PROPOSAL_COLUMNS
            ),
            params![
                proposal.id,
                proposal.analysis_run_id,
                proposal.proposed_title,
                proposal.proposed_description,
                proposal.proposed_priority.to_string(),
                proposal.proposed_category,
                serde_json::to_string(&proposal.proposed_tags)?,
                serde_json::to_string(&proposal.source_message_ids)?,
                proposal.message_count,
                proposal.time_span_seconds,
                proposal.confidence,
                proposal.llm_recommendation.to_string(),
                proposal.reasoning,
                proposal.status.as_str(),
                proposal.review_action.map(|a| a.as_str()),
                proposal.review_notes,
                proposal.reviewed_by,
                proposal.reviewed_at.map(timestamp),
                proposal.merged_into_id,
                timestamp(proposal.created_at),
                timestamp(proposal.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Overwrite the mutable columns of a proposal. The run reference is never rewritten.
    pub fn write_proposal(conn: &Connection, proposal: &TaskProposal) -> AppResult<()> {
        let changed = conn.execute(
            "UPDATE task_proposals SET
                proposed_title = ?2, proposed_description = ?3, proposed_priority = ?4,
                proposed_category = ?5, proposed_tags = ?6, source_message_ids = ?7,
                message_count = ?8, status = ?9, review_action = ?10, review_notes = ?11,
                reviewed_by = ?12, reviewed_at = ?13, merged_into_id = ?14, updated_at = ?15
             WHERE id = ?1",
            params![
                proposal.id,
                proposal.proposed_title,
                proposal.proposed_description,
                proposal.proposed_priority.to_string(),
                proposal.proposed_category,
                serde_json::to_string(&proposal.proposed_tags)?,
                serde_json::to_string(&proposal.source_message_ids)?,
                proposal.message_count,
                proposal.status.as_str(),
                proposal.review_action.map(|a| a.as_str()),
                proposal.review_notes,
                proposal.reviewed_by,
                proposal.reviewed_at.map(timestamp),
                proposal.merged_into_id,
                timestamp(proposal.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(AppError::not_found(format!("Proposal not found: {}", proposal.id)));
        }
        Ok(())
    }

    /// Read a proposal by ID
    pub fn fetch_proposal(conn: &Connection, id: &str) -> AppResult<Option<TaskProposal>> {
        let proposal = conn
            .query_row(
                &format!("SELECT {} FROM task_proposals WHERE id = ?1", PROPOSAL_COLUMNS),
                params![id],
                Self::row_to_proposal,
            )
            .optional()?;
        Ok(proposal)
    }

    /// Read the proposals of a run in creation order
    pub fn query_proposals(
        conn: &Connection,
        run_id: &str,
        status: Option<ProposalStatus>,
    ) -> AppResult<Vec<TaskProposal>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM task_proposals
             WHERE analysis_run_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at, rowid",
            PROPOSAL_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![run_id, status.map(|s| s.as_str())],
                Self::row_to_proposal,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_proposal(row: &Row) -> rusqlite::Result<TaskProposal> {
        let priority: String = row.get(4)?;
        let tags: String = row.get(6)?;
        let sources: String = row.get(7)?;
        let recommendation: String = row.get(11)?;
        let status: String = row.get(13)?;
        let status = ProposalStatus::from_str_value(&status)
            .ok_or_else(|| invalid_value(13, format!("unknown proposal status '{}'", status)))?;
        let review_action: Option<String> = row.get(14)?;

        Ok(TaskProposal {
            id: row.get(0)?,
            analysis_run_id: row.get(1)?,
            proposed_title: row.get(2)?,
            proposed_description: row.get(3)?,
            proposed_priority: TaskPriority::from_str_value(&priority),
            proposed_category: row.get(5)?,
            proposed_tags: parse_json(6, &tags)?,
            source_message_ids: parse_json(7, &sources)?,
            message_count: row.get(8)?,
            time_span_seconds: row.get(9)?,
            confidence: row.get(10)?,
            llm_recommendation: ReviewRecommendation::from_str_value(&recommendation),
            reasoning: row.get(12)?,
            status,
            review_action: review_action.as_deref().and_then(ReviewAction::from_str_value),
            review_notes: row.get(15)?,
            reviewed_by: row.get(16)?,
            reviewed_at: parse_optional_timestamp(row, 17)?,
            merged_into_id: row.get(18)?,
            created_at: parse_timestamp(row, 19)?,
            updated_at: parse_timestamp(row, 20)?,
        })
    }
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn invalid_value(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
