//! HTTP API layer
//!
//! Thin axum surface over the ingest layer: application state, the router,
//! and the serve loop with graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cfdp_common::types::DataType;

use crate::config::Config;
use crate::db;
use crate::error::AppResult;
use crate::features::imports::imports_routes;
use crate::features::jobs::jobs_routes;
use crate::ingest::health::StorageHealthGuard;
use crate::ingest::remote::RemoteClient;
use crate::ingest::{ImportPipeline, IngestControl, LocalSourceLocator, SourceLocator};

/// Shared application state, injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub pipeline: Arc<ImportPipeline>,
    pub control: Arc<IngestControl>,
    pub remote: Arc<RemoteClient>,
    pub locator: Arc<dyn SourceLocator>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> anyhow::Result<Self> {
        let locator: Arc<dyn SourceLocator> =
            Arc::new(LocalSourceLocator::new(config.ingest.data_dir.clone()));
        let pipeline = Arc::new(ImportPipeline::new(
            pool.clone(),
            locator.clone(),
            config.ingest.chunk_size,
        ));
        let control = Arc::new(IngestControl::new(
            config.ingest.max_concurrent_cycles,
            config.ingest.max_concurrent_operations,
        ));
        let remote = Arc::new(RemoteClient::new(&config.remote_api)?);

        Ok(Self {
            pool,
            config: Arc::new(config),
            pipeline,
            control,
            remote,
            locator,
        })
    }
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new().merge(jobs_routes()).merge(imports_routes());

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    // A trivial query proves the store is reachable.
    sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .map_err(db::map_storage_err)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /stats
async fn stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let mut tables = serde_json::Map::new();
    for data_type in DataType::ALL {
        let sql = format!("SELECT COUNT(*) FROM {}", data_type.table_name());
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&state.pool)
            .await
            .map_err(db::map_storage_err)?;
        tables.insert(data_type.as_str().to_string(), json!(count));
    }
    let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM import_jobs")
        .fetch_one(&state.pool)
        .await
        .map_err(db::map_storage_err)?;

    Ok(Json(json!({
        "tables": tables,
        "jobs": jobs,
        "active_operations": state.control.active_operations(),
    })))
}

/// Run the server until a shutdown signal arrives, then drain jobs.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config.database).await?;

    let guard_token = CancellationToken::new();
    let guard = StorageHealthGuard::new(
        pool.clone(),
        Duration::from_secs(config.database.checkpoint_interval_secs),
    )
    .spawn(guard_token.clone());

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(pool, config)?;
    let control = state.control.clone();
    let pipeline = state.pipeline.clone();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down, draining running jobs");
    control.shutdown(shutdown_timeout, pipeline.ledger()).await;
    guard_token.cancel();
    let _ = guard.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
