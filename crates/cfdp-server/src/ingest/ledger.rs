//! Job ledger
//!
//! The persisted state machine behind every ingestion attempt. One row per
//! job; `transition` is the only status mutator and enforces the legal
//! transitions, so a given job row is only ever advanced by its owning
//! pipeline (plus the cancellation path, which also goes through
//! `transition`).
//!
//! ```text
//! pending -> running -> completed
//!                    -> failed    -> running   (resume)
//!                    -> cancelled -> running   (resume)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use cfdp_common::types::{Cycle, DataType};
use cfdp_common::{CfdpError, Result};

use crate::db;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
                | (JobStatus::Failed, JobStatus::Running)
                | (JobStatus::Cancelled, JobStatus::Running)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of ingestion jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobType {
    /// One data type, one cycle
    SingleCycle,
    /// All data types for one cycle
    MultiType,
    /// All data types across a list of cycles
    AllCycles,
    /// Delete rows for a (type, cycle) then re-import
    CleanupReimport,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SingleCycle => "single_cycle",
            JobType::MultiType => "multi_type",
            JobType::AllCycles => "all_cycles",
            JobType::CleanupReimport => "cleanup_reimport",
        }
    }
}

/// One row of the job ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImportJob {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub cycle: Option<i64>,
    /// JSON array of cycles for multi-cycle jobs
    pub cycles: Option<String>,
    pub data_type: Option<String>,
    pub total_records: Option<i64>,
    pub imported_records: i64,
    pub skipped_records: i64,
    pub current_chunk: i64,
    pub total_chunks: Option<i64>,
    /// Row offset into the source file; monotonically non-decreasing
    pub file_position: Option<i64>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form structured detail (JSON)
    pub progress_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    /// A job may be resumed only from failed/cancelled with a recorded
    /// file position.
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, JobStatus::Failed | JobStatus::Cancelled)
            && self.file_position.is_some()
    }
}

/// Parameters for creating a new job.
#[derive(Debug, Clone, Default)]
pub struct CreateJobParams {
    pub cycle: Option<Cycle>,
    pub cycles: Option<Vec<Cycle>>,
    pub data_type: Option<DataType>,
}

/// Per-chunk progress update.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub imported_records: i64,
    pub skipped_records: i64,
    pub current_chunk: i64,
    pub file_position: i64,
    pub progress_data: Option<serde_json::Value>,
}

/// Persisted job state machine.
#[derive(Clone)]
pub struct JobLedger {
    pool: SqlitePool,
}

impl JobLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new `pending` job and return its id.
    pub async fn create(&self, job_type: JobType, params: CreateJobParams) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.create_with_id(id, job_type, params).await?;
        Ok(id)
    }

    /// Insert a new `pending` job under a caller-supplied id. Used when the
    /// id must be registered with the concurrency controller before the row
    /// exists.
    pub async fn create_with_id(
        &self,
        id: Uuid,
        job_type: JobType,
        params: CreateJobParams,
    ) -> Result<()> {
        let now = Utc::now();
        let cycles_json = match &params.cycles {
            Some(cycles) => Some(serde_json::to_string(cycles)?),
            None => None,
        };

        let pool = self.pool.clone();
        db::with_busy_retry("ledger.create", || {
            let pool = pool.clone();
            let cycles_json = cycles_json.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO import_jobs (id, job_type, status, cycle, cycles, data_type, created_at, updated_at)
                    VALUES (?, ?, 'pending', ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(job_type)
                .bind(params.cycle.map(|c| c as i64))
                .bind(cycles_json)
                .bind(params.data_type.map(|d| d.as_str()))
                .bind(now)
                .bind(now)
                .execute(&pool)
                .await
            }
        })
        .await?;

        tracing::info!(job_id = %id, job_type = %job_type.as_str(), "Created import job");
        Ok(())
    }

    /// Fetch one job.
    pub async fn get(&self, job_id: Uuid) -> Result<ImportJob> {
        sqlx::query_as::<_, ImportJob>("SELECT * FROM import_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db::map_storage_err)?
            .ok_or_else(|| CfdpError::JobNotFound(job_id.to_string()))
    }

    /// Move a job to a new status, enforcing the state machine.
    ///
    /// `error_message` is recorded on `failed`; `started_at`/`completed_at`
    /// are stamped on entry to running / a terminal state.
    pub async fn transition(
        &self,
        job_id: Uuid,
        new_status: JobStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let job = self.get(job_id).await?;

        if !job.status.can_transition_to(new_status) {
            return Err(CfdpError::InvalidTransition(format!(
                "job {}: {} -> {}",
                job_id, job.status, new_status
            )));
        }

        let now = Utc::now();
        let started_at = if new_status == JobStatus::Running && job.started_at.is_none() {
            Some(now)
        } else {
            job.started_at
        };
        let completed_at = if new_status.is_terminal() { Some(now) } else { None };

        let pool = self.pool.clone();
        db::with_busy_retry("ledger.transition", || {
            let pool = pool.clone();
            let error_message = error_message.clone();
            async move {
                sqlx::query(
                    r#"
                    UPDATE import_jobs
                    SET status = ?, error_message = ?, started_at = ?, completed_at = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(new_status)
                .bind(error_message)
                .bind(started_at)
                .bind(completed_at)
                .bind(now)
                .bind(job_id)
                .execute(&pool)
                .await
            }
        })
        .await?;

        tracing::info!(
            job_id = %job_id,
            from = %job.status,
            to = %new_status,
            "Job transition"
        );
        Ok(())
    }

    /// Record chunk-granular progress. `file_position` is clamped to be
    /// monotonically non-decreasing at the SQL level.
    pub async fn update_progress(&self, job_id: Uuid, update: &ProgressUpdate) -> Result<()> {
        let now = Utc::now();
        let progress_json = match &update.progress_data {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        let pool = self.pool.clone();
        let update = update.clone();
        db::with_busy_retry("ledger.update_progress", || {
            let pool = pool.clone();
            let progress_json = progress_json.clone();
            let update = update.clone();
            async move {
                sqlx::query(
                    r#"
                    UPDATE import_jobs
                    SET imported_records = ?,
                        skipped_records = ?,
                        current_chunk = ?,
                        file_position = MAX(COALESCE(file_position, 0), ?),
                        progress_data = COALESCE(?, progress_data),
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(update.imported_records)
                .bind(update.skipped_records)
                .bind(update.current_chunk)
                .bind(update.file_position)
                .bind(progress_json)
                .bind(now)
                .bind(job_id)
                .execute(&pool)
                .await
            }
        })
        .await?;
        Ok(())
    }

    /// Record the totals once they are known (counted at job start). Clamped
    /// upward so a resumed run that only counts the remaining files cannot
    /// shrink them.
    pub async fn set_totals(
        &self,
        job_id: Uuid,
        total_records: i64,
        total_chunks: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET total_records = MAX(COALESCE(total_records, 0), ?),
                total_chunks = MAX(COALESCE(total_chunks, 0), ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_records)
        .bind(total_chunks)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db::map_storage_err)?;
        Ok(())
    }

    /// Start a new per-file target within a multi-file job: reset the file
    /// position watermark and record which target is current. This is the
    /// only sanctioned way `file_position` moves backwards.
    pub async fn begin_target(&self, job_id: Uuid, progress_data: &serde_json::Value) -> Result<()> {
        let progress_json = serde_json::to_string(progress_data)?;
        sqlx::query(
            "UPDATE import_jobs SET file_position = 0, progress_data = ?, updated_at = ? WHERE id = ?",
        )
        .bind(progress_json)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db::map_storage_err)?;
        Ok(())
    }

    /// Jobs that have not reached a terminal state.
    pub async fn list_incomplete(&self) -> Result<Vec<ImportJob>> {
        sqlx::query_as::<_, ImportJob>(
            "SELECT * FROM import_jobs WHERE status IN ('pending', 'running') ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db::map_storage_err)
    }

    /// Most recently created jobs, any status.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<ImportJob>> {
        sqlx::query_as::<_, ImportJob>(
            "SELECT * FROM import_jobs ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(db::map_storage_err)
    }

    /// Shutdown path: mark every running job cancelled in one statement.
    /// Returns how many rows were updated.
    pub async fn mark_running_cancelled(&self) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'cancelled', completed_at = ?, updated_at = ?
            WHERE status = 'running'
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db::map_storage_err)?;
        Ok(result.rows_affected())
    }
}
