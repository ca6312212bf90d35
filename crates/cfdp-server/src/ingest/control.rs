//! Concurrency controller
//!
//! Owns every piece of in-process job coordination state: the semaphore
//! bounding concurrent cycle pipelines, the global admission ceiling, and
//! the per-job cancellation token and task registries. Constructed once at
//! startup and injected wherever jobs are launched; nothing here is global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cfdp_common::{CfdpError, Result};

use super::ledger::JobLedger;

#[derive(Default)]
struct Registries {
    tokens: HashMap<Uuid, CancellationToken>,
    tasks: HashMap<Uuid, JoinHandle<()>>,
}

pub struct IngestControl {
    cycle_permits: Arc<Semaphore>,
    max_operations: usize,
    registries: Mutex<Registries>,
}

impl IngestControl {
    pub fn new(max_concurrent_cycles: usize, max_operations: usize) -> Self {
        Self {
            cycle_permits: Arc::new(Semaphore::new(max_concurrent_cycles)),
            max_operations,
            registries: Mutex::new(Registries::default()),
        }
    }

    /// Admit a new job. Fails with `TooManyOperations` once the global
    /// ceiling is reached; admitted jobs get their cancellation token.
    ///
    /// Admission is checked at registration so callers can reject with a 429
    /// before any work is spawned; the semaphore then queues admitted jobs
    /// up to the cycle limit.
    pub fn register(&self, job_id: Uuid) -> Result<CancellationToken> {
        let mut registries = self
            .registries
            .lock()
            .map_err(|_| CfdpError::Unknown("control registry poisoned".to_string()))?;

        if registries.tokens.len() >= self.max_operations {
            return Err(CfdpError::TooManyOperations { limit: self.max_operations });
        }

        let token = CancellationToken::new();
        registries.tokens.insert(job_id, token.clone());
        Ok(token)
    }

    /// Record the spawned task for an admitted job.
    pub fn attach_task(&self, job_id: Uuid, handle: JoinHandle<()>) {
        if let Ok(mut registries) = self.registries.lock() {
            registries.tasks.insert(job_id, handle);
        }
    }

    /// Acquire a cycle permit; held for the duration of one pipeline run.
    pub async fn acquire_cycle_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.cycle_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CfdpError::Unknown("cycle semaphore closed".to_string()))
    }

    /// Release a job's registry entries after its task finishes.
    pub fn finish(&self, job_id: Uuid) {
        if let Ok(mut registries) = self.registries.lock() {
            registries.tokens.remove(&job_id);
            registries.tasks.remove(&job_id);
        }
    }

    /// Request cancellation of a running job. Returns false when the job has
    /// no registered token (already finished or never admitted).
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let registries = match self.registries.lock() {
            Ok(registries) => registries,
            Err(_) => return false,
        };
        match registries.tokens.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of currently admitted operations.
    pub fn active_operations(&self) -> usize {
        self.registries.lock().map(|r| r.tokens.len()).unwrap_or(0)
    }

    /// Graceful shutdown: cancel every token, wait up to `timeout` for the
    /// tasks to drain, abort stragglers, and mark still-running ledger rows
    /// cancelled so they are resumable after restart.
    pub async fn shutdown(&self, timeout: Duration, ledger: &JobLedger) {
        let (tokens, tasks): (Vec<_>, Vec<_>) = match self.registries.lock() {
            Ok(mut registries) => (
                registries.tokens.drain().collect(),
                registries.tasks.drain().collect(),
            ),
            Err(_) => return,
        };

        for (_, token) in &tokens {
            token.cancel();
        }

        // A dropped JoinHandle detaches its task, so stragglers must be
        // aborted explicitly once the deadline passes.
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0usize;
        for (job_id, mut handle) in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if err.is_panic() {
                        tracing::error!(job_id = %job_id, "Job task panicked during shutdown");
                    }
                }
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                    tracing::warn!(job_id = %job_id, "Job task did not stop in time, aborting");
                }
            }
        }
        if aborted > 0 {
            tracing::warn!(count = aborted, "Aborted job tasks at shutdown deadline");
        }

        match ledger.mark_running_cancelled().await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count = count, "Marked running jobs cancelled"),
            Err(err) => tracing::error!(error = %err, "Failed to mark running jobs cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_ceiling() {
        let control = IngestControl::new(2, 2);
        control.register(Uuid::new_v4()).unwrap();
        control.register(Uuid::new_v4()).unwrap();

        let err = control.register(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CfdpError::TooManyOperations { limit: 2 }));
    }

    #[test]
    fn test_finish_frees_a_slot() {
        let control = IngestControl::new(1, 1);
        let job = Uuid::new_v4();
        control.register(job).unwrap();
        assert!(control.register(Uuid::new_v4()).is_err());

        control.finish(job);
        assert_eq!(control.active_operations(), 0);
        assert!(control.register(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_cancel_fires_registered_token() {
        let control = IngestControl::new(1, 4);
        let job = Uuid::new_v4();
        let token = control.register(job).unwrap();

        assert!(!token.is_cancelled());
        assert!(control.cancel(job));
        assert!(token.is_cancelled());

        // Unknown jobs report false.
        assert!(!control.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_non_cooperative_task() {
        let control = IngestControl::new(1, 4);
        let ledger = JobLedger::new(crate::db::create_memory_pool().await.unwrap());

        let job = Uuid::new_v4();
        control.register(job).unwrap();

        // A task that ignores its cancellation token entirely. The held
        // oneshot sender drops only when the task is truly torn down.
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        control.attach_task(job, handle);

        control.shutdown(Duration::from_millis(50), &ledger).await;

        // Sender dropped means the task was aborted, not detached.
        assert!(alive_rx.await.is_err());
        assert_eq!(control.active_operations(), 0);
    }

    #[tokio::test]
    async fn test_cycle_permits_bound_parallelism() {
        let control = Arc::new(IngestControl::new(1, 4));

        let first = control.acquire_cycle_permit().await.unwrap();
        // Second acquisition must wait until the first permit drops.
        let pending = {
            let control = control.clone();
            tokio::spawn(async move { control.acquire_cycle_permit().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(first);
        pending.await.unwrap().unwrap();
    }
}
