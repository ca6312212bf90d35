//! Storage health guard
//!
//! Bulk imports write through the WAL fast enough that the log can outgrow
//! the database between natural checkpoints. A background task periodically
//! runs an integrity check and then checkpoints, escalating through the
//! checkpoint modes until one gets through. Nothing here is fatal: a missed
//! checkpoint is logged and retried on the next tick.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Checkpoint modes in escalation order.
const CHECKPOINT_MODES: [&str; 3] = ["PASSIVE", "RESTART", "TRUNCATE"];

pub struct StorageHealthGuard {
    pool: SqlitePool,
    interval: Duration,
}

impl StorageHealthGuard {
    pub fn new(pool: SqlitePool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Spawn the periodic guard. Runs until the token fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Storage health guard stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_health_pass(&self.pool).await;
                    }
                }
            }
        })
    }
}

/// One guard pass: integrity check, then an escalating checkpoint.
pub async fn run_health_pass(pool: &SqlitePool) {
    match quick_check(pool).await {
        Ok(true) => {}
        Ok(false) => {
            error!("Integrity check failed, skipping checkpoint");
            return;
        }
        Err(err) => {
            warn!(error = %err, "Integrity check could not run");
            return;
        }
    }

    checkpoint_escalating(pool).await;
}

/// `PRAGMA quick_check` returns a single "ok" row on a healthy store.
async fn quick_check(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    let result: String = sqlx::query_scalar("PRAGMA quick_check").fetch_one(pool).await?;
    Ok(result.eq_ignore_ascii_case("ok"))
}

/// Try each checkpoint mode until one reports success (busy flag 0).
async fn checkpoint_escalating(pool: &SqlitePool) {
    for mode in CHECKPOINT_MODES {
        match checkpoint(pool, mode).await {
            Ok((0, log_frames, checkpointed)) => {
                info!(
                    mode = mode,
                    log_frames = log_frames,
                    checkpointed = checkpointed,
                    "WAL checkpoint complete"
                );
                return;
            }
            Ok((busy, _, _)) => {
                debug!(mode = mode, busy = busy, "Checkpoint blocked, escalating");
            }
            Err(err) => {
                warn!(mode = mode, error = %err, "Checkpoint failed, escalating");
            }
        }
    }
    warn!("All checkpoint modes blocked; will retry next interval");
}

async fn checkpoint(pool: &SqlitePool, mode: &str) -> Result<(i64, i64, i64), sqlx::Error> {
    // Pragma arguments cannot be bound.
    let sql = format!("PRAGMA wal_checkpoint({mode})");
    sqlx::query_as::<_, (i64, i64, i64)>(&sql).fetch_one(pool).await
}

/// Forced truncate checkpoint, run after every completed bulk import.
/// Failures are logged, never surfaced to the pipeline.
pub async fn checkpoint_truncate(pool: &SqlitePool) {
    match checkpoint(pool, "TRUNCATE").await {
        Ok((0, _, checkpointed)) => {
            info!(checkpointed = checkpointed, "Post-import WAL truncate complete");
        }
        Ok((busy, _, _)) => {
            warn!(busy = busy, "Post-import WAL truncate blocked");
        }
        Err(err) => {
            warn!(error = %err, "Post-import WAL truncate failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::create_pool;

    async fn file_pool(dir: &tempfile::TempDir) -> SqlitePool {
        create_pool(&DatabaseConfig {
            path: dir.path().join("guard.db"),
            max_connections: 2,
            checkpoint_interval_secs: 1800,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_quick_check_ok_on_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir).await;
        assert!(quick_check(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_checkpoint_truncate_runs() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir).await;
        sqlx::query("INSERT INTO file_metadata (data_type, cycle) VALUES ('candidates', 2024)")
            .execute(&pool)
            .await
            .unwrap();
        // Must not error or panic regardless of WAL state.
        checkpoint_truncate(&pool).await;
        run_health_pass(&pool).await;
    }

    #[tokio::test]
    async fn test_guard_stops_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir).await;
        let token = CancellationToken::new();
        let handle = StorageHealthGuard::new(pool, Duration::from_secs(3600)).spawn(token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
