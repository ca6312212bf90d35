//! Database access layer
//!
//! SQLite pool construction (WAL mode, busy timeout), schema initialization,
//! and the typed busy-retry helper used by every bulk writer.
//!
//! The store runs in WAL journal mode so readers are never blocked by the
//! import pipelines; the health guard (`ingest::health`) keeps the log from
//! growing without bound.

use anyhow::{Context, Result};
use cfdp_common::CfdpError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::DatabaseConfig;

/// Maximum attempts for a busy-retried operation.
pub const MAX_BUSY_ATTEMPTS: u32 = 5;

/// Initial backoff delay between busy retries.
pub const INITIAL_BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Create the SQLite connection pool and initialize the schema.
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .context("Failed to open SQLite database")?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create a single-connection in-memory pool for tests.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("Failed to open in-memory SQLite database")?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            id               BLOB PRIMARY KEY,
            job_type         TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'pending',
            cycle            INTEGER,
            cycles           TEXT,
            data_type        TEXT,
            total_records    INTEGER,
            imported_records INTEGER NOT NULL DEFAULT 0,
            skipped_records  INTEGER NOT NULL DEFAULT 0,
            current_chunk    INTEGER NOT NULL DEFAULT 0,
            total_chunks     INTEGER,
            file_position    INTEGER,
            error_message    TEXT,
            started_at       TEXT,
            completed_at     TEXT,
            progress_data    TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create import_jobs table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_import_jobs_status ON import_jobs (status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS candidates (
            cand_id           TEXT NOT NULL,
            cycle             INTEGER NOT NULL,
            name              TEXT,
            party             TEXT,
            office            TEXT,
            state             TEXT,
            district          TEXT,
            data_source       TEXT NOT NULL,
            last_updated_from TEXT NOT NULL,
            raw_payload       TEXT NOT NULL DEFAULT '{}',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            PRIMARY KEY (cand_id, cycle)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create candidates table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS committees (
            cmte_id           TEXT NOT NULL,
            cycle             INTEGER NOT NULL,
            name              TEXT,
            treasurer         TEXT,
            state             TEXT,
            designation       TEXT,
            committee_type    TEXT,
            cand_id           TEXT,
            data_source       TEXT NOT NULL,
            last_updated_from TEXT NOT NULL,
            raw_payload       TEXT NOT NULL DEFAULT '{}',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            PRIMARY KEY (cmte_id, cycle)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create committees table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contributions (
            sub_id            TEXT PRIMARY KEY,
            cycle             INTEGER NOT NULL,
            cmte_id           TEXT,
            cand_id           TEXT,
            contributor_name  TEXT,
            city              TEXT,
            state             TEXT,
            zip_code          TEXT,
            employer          TEXT,
            occupation        TEXT,
            amount            REAL,
            contribution_date TEXT,
            transaction_type  TEXT,
            data_source       TEXT NOT NULL,
            last_updated_from TEXT NOT NULL,
            raw_payload       TEXT NOT NULL DEFAULT '{}',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create contributions table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contributions_cmte ON contributions (cmte_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contributions_cycle ON contributions (cycle)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contributions_missing_cand
         ON contributions (cmte_id) WHERE cand_id IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_metadata (
            data_type        TEXT NOT NULL,
            cycle            INTEGER NOT NULL,
            last_download_at TEXT,
            last_import_at   TEXT,
            record_count     INTEGER,
            PRIMARY KEY (data_type, cycle)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create file_metadata table")?;

    Ok(())
}

/// Whether a sqlx error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// Checks the primary result code (extended codes carry it in the low byte),
/// never the message text.
pub fn is_busy(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            if let Ok(code) = code.parse::<i64>() {
                let primary = code & 0xff;
                return primary == 5 || primary == 6;
            }
        }
    }
    false
}

/// Map a sqlx error onto the shared error type, preserving the busy kind.
pub fn map_storage_err(err: sqlx::Error) -> CfdpError {
    if is_busy(&err) {
        CfdpError::StorageBusy(err.to_string())
    } else {
        CfdpError::Storage(err.to_string())
    }
}

/// Run a storage operation, retrying with exponential backoff while the
/// store reports busy. Non-busy errors surface immediately.
pub async fn with_busy_retry<T, F, Fut>(op: &str, mut f: F) -> std::result::Result<T, CfdpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delay = INITIAL_BUSY_BACKOFF;
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) && attempt < MAX_BUSY_ATTEMPTS => {
                warn!(
                    op = op,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Storage busy, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(map_storage_err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_initializes() {
        let pool = create_memory_pool().await.unwrap();
        // All tables queryable after init.
        for table in ["import_jobs", "candidates", "committees", "contributions", "file_metadata"] {
            let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count.0, 0);
        }
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let pool = create_memory_pool().await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_with_busy_retry_passes_through_success() {
        let result: Result<i32, _> = with_busy_retry("test", || async { Ok::<_, sqlx::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_busy_retry_surfaces_plain_errors() {
        let result: std::result::Result<i32, CfdpError> =
            with_busy_retry("test", || async { Err(sqlx::Error::RowNotFound) }).await;
        assert!(matches!(result, Err(CfdpError::Storage(_))));
    }

    #[test]
    fn test_is_busy_rejects_non_database_errors() {
        assert!(!is_busy(&sqlx::Error::RowNotFound));
    }
}
