//! Import pipeline
//!
//! Drives one job from a ledger row to completion: resolve the source file,
//! stream it in chunks, normalize and merge-upsert each chunk in its own
//! transaction, and keep the ledger current after every chunk. Cancellation
//! is checked at chunk boundaries, so a cancel lands within one chunk of
//! work. Multi-file jobs (multi-type, all-cycles) run their targets
//! sequentially under one job row, tracking per-target completion in
//! `progress_data` so a resume can skip finished files.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cfdp_common::types::{Cycle, DataType, SourceKind};
use cfdp_common::{CfdpError, Result};

use super::control::IngestControl;
use super::health;
use super::ledger::{CreateJobParams, ImportJob, JobLedger, JobStatus, JobType, ProgressUpdate};
use super::metadata::FileMetadataStore;
use super::normalize::normalize_bulk;
use super::parser::ChunkedReader;
use super::source::{self, SourceLocator};
use super::store::RecordStore;

/// How a pipeline run ended, short of an error.
enum JobEnd {
    Completed,
    Cancelled,
}

/// Per-target bookkeeping carried in the ledger's `progress_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JobProgress {
    /// Finished `type:cycle` targets
    #[serde(default)]
    completed: Vec<String>,
    /// Target currently being imported
    #[serde(default)]
    current: Option<String>,
}

fn target_key(data_type: DataType, cycle: Cycle) -> String {
    format!("{}:{}", data_type, cycle)
}

pub struct ImportPipeline {
    pool: SqlitePool,
    ledger: JobLedger,
    store: RecordStore,
    metadata: FileMetadataStore,
    locator: Arc<dyn SourceLocator>,
    chunk_size: usize,
}

impl ImportPipeline {
    pub fn new(pool: SqlitePool, locator: Arc<dyn SourceLocator>, chunk_size: usize) -> Self {
        Self {
            ledger: JobLedger::new(pool.clone()),
            store: RecordStore::new(pool.clone()),
            metadata: FileMetadataStore::new(pool.clone()),
            pool,
            locator,
            chunk_size,
        }
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Run one job to a terminal state. Every outcome, including an internal
    /// error, lands in the ledger; this function itself never fails the
    /// caller.
    pub async fn run_job(&self, job_id: Uuid, token: CancellationToken, force: bool) {
        let job = match self.ledger.get(job_id).await {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "Job vanished before start");
                return;
            }
        };

        if let Err(err) = self.ledger.transition(job_id, JobStatus::Running, None).await {
            tracing::error!(job_id = %job_id, error = %err, "Could not start job");
            return;
        }

        match self.execute(&job, &token, force).await {
            Ok(JobEnd::Completed) => {
                if let Err(err) = self.ledger.transition(job_id, JobStatus::Completed, None).await {
                    tracing::error!(job_id = %job_id, error = %err, "Could not record completion");
                }
            }
            Ok(JobEnd::Cancelled) => {
                if let Err(err) = self.ledger.transition(job_id, JobStatus::Cancelled, None).await {
                    tracing::error!(job_id = %job_id, error = %err, "Could not record cancellation");
                }
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "Import job failed");
                if let Err(ledger_err) = self
                    .ledger
                    .transition(job_id, JobStatus::Failed, Some(err.to_string()))
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %ledger_err, "Could not record failure");
                }
            }
        }
    }

    /// The (data type, cycle) targets a job covers, in import order.
    fn targets(job: &ImportJob) -> Result<Vec<(DataType, Cycle)>> {
        let parse_type = |s: &str| -> Result<DataType> {
            s.parse()
                .map_err(|e: anyhow::Error| CfdpError::Config(e.to_string()))
        };

        match job.job_type {
            JobType::SingleCycle | JobType::CleanupReimport => {
                let data_type = parse_type(
                    job.data_type
                        .as_deref()
                        .ok_or_else(|| CfdpError::Config("job has no data_type".to_string()))?,
                )?;
                let cycle = job
                    .cycle
                    .ok_or_else(|| CfdpError::Config("job has no cycle".to_string()))?;
                Ok(vec![(data_type, cycle as Cycle)])
            }
            JobType::MultiType => {
                let cycle = job
                    .cycle
                    .ok_or_else(|| CfdpError::Config("job has no cycle".to_string()))?;
                Ok(DataType::ALL
                    .into_iter()
                    .map(|dt| (dt, cycle as Cycle))
                    .collect())
            }
            JobType::AllCycles => {
                let cycles: Vec<Cycle> = serde_json::from_str(
                    job.cycles
                        .as_deref()
                        .ok_or_else(|| CfdpError::Config("job has no cycles".to_string()))?,
                )?;
                let mut targets = Vec::with_capacity(cycles.len() * DataType::ALL.len());
                for cycle in cycles {
                    for dt in DataType::ALL {
                        targets.push((dt, cycle));
                    }
                }
                Ok(targets)
            }
        }
    }

    async fn execute(&self, job: &ImportJob, token: &CancellationToken, force: bool) -> Result<JobEnd> {
        let targets = Self::targets(job)?;
        let mut progress: JobProgress = job
            .progress_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        // Resume state: counters continue where they stopped; the recorded
        // position applies only to the target that was current.
        let resume_target = progress.current.clone();
        let mut resume_position = job.file_position.map(|p| p as u64);
        let mut imported = job.imported_records;
        let mut skipped = job.skipped_records;
        let mut chunk_index = job.current_chunk;

        if job.job_type == JobType::CleanupReimport && resume_position.is_none() {
            for &(data_type, cycle) in &targets {
                let dropped = self.store.delete_cycle(data_type, cycle).await?;
                tracing::info!(
                    job_id = %job.id,
                    data_type = %data_type,
                    cycle = cycle,
                    dropped = dropped,
                    "Cleared rows for reimport"
                );
            }
        }

        let mut counted_records = 0i64;
        let mut counted_chunks = 0i64;

        for (data_type, cycle) in targets {
            let key = target_key(data_type, cycle);
            if progress.completed.contains(&key) {
                continue;
            }
            if token.is_cancelled() {
                return Ok(JobEnd::Cancelled);
            }

            let source = self.locator.locate(data_type, cycle)?;

            let resuming_this_target = resume_target.as_deref() == Some(key.as_str())
                && resume_position.is_some();

            // A cleanup job just dropped its rows, so freshness is moot.
            if !force
                && !resuming_this_target
                && job.job_type != JobType::CleanupReimport
                && self
                    .metadata
                    .is_fresh(data_type, cycle, source.modified_at)
                    .await?
            {
                tracing::info!(
                    job_id = %job.id,
                    data_type = %data_type,
                    cycle = cycle,
                    "Source unchanged since last import, skipping"
                );
                progress.completed.push(key);
                progress.current = None;
                self.ledger
                    .begin_target(job.id, &serde_json::to_value(&progress)?)
                    .await?;
                continue;
            }

            // Zipped sources are extracted once per target; the count pass
            // and the import pass both read the materialized plain file.
            let mat_path = source.path.clone();
            let mat_layout = source.layout.clone();
            let local = tokio::task::spawn_blocking(move || source::materialize(&mat_path, &mat_layout))
                .await
                .map_err(|e| CfdpError::Unknown(e.to_string()))?
                .map_err(|e| CfdpError::SourceUnavailable(e.to_string()))?;

            let count_path = local.path().to_path_buf();
            let count_layout = source.layout.clone();
            let file_total =
                tokio::task::spawn_blocking(move || ChunkedReader::count_rows(&count_path, count_layout))
                    .await
                    .map_err(|e| CfdpError::Unknown(e.to_string()))?
                    .map_err(|e| CfdpError::Parse(e.to_string()))? as i64;
            counted_records += file_total;
            counted_chunks += (file_total + self.chunk_size as i64 - 1) / self.chunk_size as i64;
            self.ledger
                .set_totals(job.id, counted_records, counted_chunks)
                .await?;

            progress.current = Some(key.clone());
            let start_from = if resuming_this_target {
                resume_position.take().unwrap_or(0)
            } else {
                self.ledger
                    .begin_target(job.id, &serde_json::to_value(&progress)?)
                    .await?;
                0
            };

            tracing::info!(
                job_id = %job.id,
                data_type = %data_type,
                cycle = cycle,
                path = ?source.path,
                total_rows = file_total,
                start_from = start_from,
                "Importing bulk file"
            );

            let open_path = local.path().to_path_buf();
            let open_layout = source.layout.clone();
            let mut reader = tokio::task::spawn_blocking(move || {
                if start_from > 0 {
                    ChunkedReader::resume(&open_path, open_layout, start_from)
                } else {
                    ChunkedReader::open(&open_path, open_layout)
                }
            })
            .await
            .map_err(|e| CfdpError::Unknown(e.to_string()))?
            .map_err(|e| CfdpError::SourceUnavailable(e.to_string()))?;

            loop {
                if token.is_cancelled() {
                    tracing::info!(job_id = %job.id, "Cancellation requested, stopping at chunk boundary");
                    return Ok(JobEnd::Cancelled);
                }

                let chunk_size = self.chunk_size;
                let (returned, batch) = tokio::task::spawn_blocking(move || {
                    let mut reader = reader;
                    let batch = reader.next_batch(chunk_size);
                    (reader, batch)
                })
                .await
                .map_err(|e| CfdpError::Unknown(e.to_string()))?;
                reader = returned;

                let Some(batch) = batch.map_err(|e| CfdpError::Parse(e.to_string()))? else {
                    break;
                };

                let started = Instant::now();
                let mut records = Vec::with_capacity(batch.rows.len());
                let mut parse_failures = 0i64;
                for row in &batch.rows {
                    match normalize_bulk(data_type, row) {
                        Ok(record) => records.push(record),
                        Err(_) => parse_failures += 1,
                    }
                }

                let written = self
                    .store
                    .upsert_chunk(data_type, cycle, SourceKind::Bulk, &records)
                    .await?;

                imported += written as i64;
                skipped += batch.skipped as i64 + parse_failures;
                chunk_index += 1;

                self.ledger
                    .update_progress(
                        job.id,
                        &ProgressUpdate {
                            imported_records: imported,
                            skipped_records: skipped,
                            current_chunk: chunk_index,
                            file_position: batch.next_position as i64,
                            progress_data: None,
                        },
                    )
                    .await?;

                let elapsed = started.elapsed().as_secs_f64();
                tracing::debug!(
                    job_id = %job.id,
                    chunk = chunk_index,
                    written = written,
                    skipped_in_chunk = batch.skipped as i64 + parse_failures,
                    rows_per_sec = if elapsed > 0.0 { (written as f64 / elapsed) as u64 } else { 0 },
                    "Chunk committed"
                );
            }

            self.metadata.record_import(data_type, cycle, file_total).await?;
            health::checkpoint_truncate(&self.pool).await;

            progress.completed.push(key);
            progress.current = None;
            self.ledger
                .update_progress(
                    job.id,
                    &ProgressUpdate {
                        imported_records: imported,
                        skipped_records: skipped,
                        current_chunk: chunk_index,
                        file_position: reader.position() as i64,
                        progress_data: Some(serde_json::to_value(&progress)?),
                    },
                )
                .await?;

            tracing::info!(
                job_id = %job.id,
                data_type = %data_type,
                cycle = cycle,
                imported = imported,
                skipped = skipped,
                "Bulk file imported"
            );
        }

        Ok(JobEnd::Completed)
    }
}

/// Create a job, admit it, and spawn its task. Returns the job id, or
/// `TooManyOperations` when the admission ceiling is hit (nothing is created
/// in that case).
pub async fn spawn_job(
    pipeline: Arc<ImportPipeline>,
    control: Arc<IngestControl>,
    job_type: JobType,
    params: CreateJobParams,
    force: bool,
) -> Result<Uuid> {
    let job_id = Uuid::new_v4();
    let token = control.register(job_id)?;

    if let Err(err) = pipeline.ledger().create_with_id(job_id, job_type, params).await {
        control.finish(job_id);
        return Err(err);
    }

    spawn_admitted(pipeline, control, job_id, token, force);
    Ok(job_id)
}

/// Re-admit and restart a resumable job.
pub async fn resume_job(
    pipeline: Arc<ImportPipeline>,
    control: Arc<IngestControl>,
    job_id: Uuid,
) -> Result<()> {
    let job = pipeline.ledger().get(job_id).await?;
    if !job.is_resumable() {
        return Err(CfdpError::InvalidTransition(format!(
            "job {} is {} and cannot be resumed",
            job_id, job.status
        )));
    }

    let token = control.register(job_id)?;
    spawn_admitted(pipeline, control, job_id, token, false);
    Ok(())
}

fn spawn_admitted(
    pipeline: Arc<ImportPipeline>,
    control: Arc<IngestControl>,
    job_id: Uuid,
    token: CancellationToken,
    force: bool,
) {
    let task_control = control.clone();
    let handle = tokio::spawn(async move {
        let _permit = match task_control.acquire_cycle_permit().await {
            Ok(permit) => permit,
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "Could not acquire cycle permit");
                task_control.finish(job_id);
                return;
            }
        };
        pipeline.run_job(job_id, token, force).await;
        task_control.finish(job_id);
    });
    control.attach_task(job_id, handle);
}
