//! Import routes
//!
//! POST /imports                 - launch an import job (202, or 429 at the
//!                                 admission ceiling)
//! POST /verify/:cycle           - count verification for one cycle
//! POST /verify/:cycle/sample    - random sample check for one data type
//! POST /backfill/candidate-ids  - run the candidate-id backfill

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use cfdp_common::types::{validate_cycle, Cycle, DataType};

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::ingest::ledger::{CreateJobParams, JobType};
use crate::ingest::{backfill, pipeline, verify};

pub fn imports_routes() -> Router<AppState> {
    Router::new()
        .route("/imports", post(run_import))
        .route("/verify/:cycle", post(verify_cycle))
        .route("/verify/:cycle/sample", post(sample_cycle))
        .route("/backfill/candidate-ids", post(backfill_candidate_ids))
}

#[derive(Debug, Deserialize)]
struct RunImportRequest {
    /// Omit to import every data type for the cycle
    data_type: Option<DataType>,
    cycle: Option<Cycle>,
    /// Multiple cycles; every data type is imported for each
    cycles: Option<Vec<Cycle>>,
    /// Re-import even when the source file is unchanged
    #[serde(default)]
    force: bool,
    /// Delete existing rows for the (type, cycle) before importing
    #[serde(default)]
    cleanup: bool,
}

/// POST /imports
async fn run_import(
    State(state): State<AppState>,
    Json(request): Json<RunImportRequest>,
) -> AppResult<impl IntoResponse> {
    let (job_type, params) = match (&request.cycles, request.cycle, request.data_type) {
        (Some(cycles), _, _) => {
            if cycles.is_empty() {
                return Err(AppError::Validation("cycles must not be empty".to_string()));
            }
            for &cycle in cycles {
                validate_cycle(cycle).map_err(|e| AppError::Validation(e.to_string()))?;
            }
            if request.cleanup {
                return Err(AppError::Validation(
                    "cleanup applies to a single data type and cycle".to_string(),
                ));
            }
            (
                JobType::AllCycles,
                CreateJobParams { cycle: None, cycles: Some(cycles.clone()), data_type: None },
            )
        }
        (None, Some(cycle), data_type) => {
            validate_cycle(cycle).map_err(|e| AppError::Validation(e.to_string()))?;
            match data_type {
                Some(data_type) => {
                    let job_type = if request.cleanup {
                        JobType::CleanupReimport
                    } else {
                        JobType::SingleCycle
                    };
                    (
                        job_type,
                        CreateJobParams {
                            cycle: Some(cycle),
                            cycles: None,
                            data_type: Some(data_type),
                        },
                    )
                }
                None => {
                    if request.cleanup {
                        return Err(AppError::Validation(
                            "cleanup applies to a single data type and cycle".to_string(),
                        ));
                    }
                    (
                        JobType::MultiType,
                        CreateJobParams { cycle: Some(cycle), cycles: None, data_type: None },
                    )
                }
            }
        }
        (None, None, _) => {
            return Err(AppError::Validation(
                "either cycle or cycles is required".to_string(),
            ));
        }
    };

    let job_id = pipeline::spawn_job(
        state.pipeline.clone(),
        state.control.clone(),
        job_type,
        params,
        request.force,
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

/// POST /verify/:cycle
async fn verify_cycle(
    State(state): State<AppState>,
    Path(cycle): Path<Cycle>,
) -> AppResult<impl IntoResponse> {
    validate_cycle(cycle).map_err(|e| AppError::Validation(e.to_string()))?;
    let report = verify::verify(
        state.pipeline.store(),
        state.locator.clone(),
        &state.config.ingest.tolerance,
        cycle,
    )
    .await?;
    Ok(Json(json!(report)))
}

#[derive(Debug, Deserialize)]
struct SampleQuery {
    data_type: DataType,
    sample_size: Option<usize>,
}

/// POST /verify/:cycle/sample?data_type=candidates&sample_size=100
async fn sample_cycle(
    State(state): State<AppState>,
    Path(cycle): Path<Cycle>,
    Query(query): Query<SampleQuery>,
) -> AppResult<impl IntoResponse> {
    validate_cycle(cycle).map_err(|e| AppError::Validation(e.to_string()))?;
    let report = verify::sample_check(
        state.pipeline.store(),
        state.locator.clone(),
        query.data_type,
        cycle,
        query.sample_size.unwrap_or(100),
    )
    .await?;
    Ok(Json(json!(report)))
}

#[derive(Debug, Deserialize)]
struct BackfillRequest {
    batch_size: Option<usize>,
    limit: Option<usize>,
}

/// POST /backfill/candidate-ids
async fn backfill_candidate_ids(
    State(state): State<AppState>,
    Json(request): Json<BackfillRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = backfill::backfill_candidate_ids(
        &state.pool,
        &state.remote,
        request.batch_size.unwrap_or(50),
        request.limit.unwrap_or(1_000),
    )
    .await?;
    Ok(Json(json!(outcome)))
}
