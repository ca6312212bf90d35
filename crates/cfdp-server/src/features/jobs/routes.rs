//! Job routes
//!
//! GET  /jobs                 - recent jobs
//! GET  /jobs/incomplete      - pending/running jobs
//! GET  /jobs/:job_id         - one job
//! POST /jobs/:job_id/cancel  - request cancellation
//! POST /jobs/:job_id/resume  - re-admit a failed/cancelled job

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::ingest::pipeline;

pub fn jobs_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/incomplete", get(list_incomplete))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/resume", post(resume_job))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    limit: Option<i64>,
}

/// GET /jobs?limit=50
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .pipeline
        .ledger()
        .list_recent(query.limit.unwrap_or(50))
        .await?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// GET /jobs/incomplete
async fn list_incomplete(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.pipeline.ledger().list_incomplete().await?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// GET /jobs/:job_id
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let job = state.pipeline.ledger().get(job_id).await?;
    Ok(Json(json!(job)))
}

/// POST /jobs/:job_id/cancel
///
/// Cancellation is honored at the next chunk boundary; this returns as soon
/// as the request is registered.
async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    // Surface a 404 for ids the ledger has never seen.
    let job = state.pipeline.ledger().get(job_id).await?;

    if !state.control.cancel(job_id) {
        return Err(AppError::Conflict(format!(
            "job {} is {} and has no running task",
            job_id, job.status
        )));
    }

    tracing::info!(job_id = %job_id, "Cancellation requested");
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id, "cancelling": true }))))
}

/// POST /jobs/:job_id/resume
async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    pipeline::resume_job(state.pipeline.clone(), state.control.clone(), job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id, "resumed": true }))))
}
