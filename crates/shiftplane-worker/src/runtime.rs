//! Worker Runtime. `WorkerRuntime::run` checks shutdown, polls once, and
//! backs off on idle or error with the shutdown signal racing the sleep
//! so shutdown during backoff is still prompt.

use std::sync::Arc;
use std::time::Duration;

use shiftplane_core::catalog::{self, ResultCatalog};
use shiftplane_core::object_store_adapter::ObjectStoreAdapter;
use shiftplane_core::queue::{Queue, ReceiptHandle};
use shiftplane_core::registry::RunRegistry;
use shiftplane_core::solver::{Cancelled, ProgressCallback, SolverError, SolverJob};
use shiftplane_core::types::{JobEnvelope, LogLevel, ResultMetadata};
use tokio::sync::watch;

/// Backoff when the queue had nothing to offer on the last poll.
const IDLE_BACKOFF: Duration = Duration::from_millis(1_000);
/// Longer backoff after a poll cycle error, a 5x multiplier over the idle
/// backoff.
const ERROR_BACKOFF: Duration = Duration::from_millis(5_000);
/// Long-poll wait per receive.
const RECEIVE_WAIT: Duration = Duration::from_secs(20);

pub struct WorkerRuntime {
    worker_id: String,
    queue: Arc<dyn Queue>,
    store: ObjectStoreAdapter,
    registry: Arc<RunRegistry>,
    catalog: Arc<ResultCatalog>,
    solver: Arc<dyn SolverJob>,
    visibility_timeout: Duration,
}

impl WorkerRuntime {
    pub fn new(
        worker_id: String,
        queue: Arc<dyn Queue>,
        store: ObjectStoreAdapter,
        registry: Arc<RunRegistry>,
        catalog: Arc<ResultCatalog>,
        solver: Arc<dyn SolverJob>,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            worker_id,
            queue,
            store,
            registry,
            catalog,
            solver,
            visibility_timeout,
        }
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.worker_id, "worker started");

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!(worker_id = %self.worker_id, "worker shutting down");
                break;
            }

            match self.poll_and_execute().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_BACKOFF) => {},
                        _ = shutdown_rx.changed() => {
                            tracing::info!(worker_id = %self.worker_id, "worker shutting down (during idle backoff)");
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "poll cycle failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {},
                        _ = shutdown_rx.changed() => break,
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Long-polls once and processes at most one envelope: one in-flight
    /// job per worker instance by default. Returns whether a job was
    /// processed.
    async fn poll_and_execute(&self) -> anyhow::Result<bool> {
        let received = self.queue.receive(RECEIVE_WAIT).await?;
        let Some((handle, envelope)) = received else {
            return Ok(false);
        };
        self.process_job(handle, envelope).await;
        Ok(true)
    }

    async fn process_job(&self, handle: ReceiptHandle, envelope: JobEnvelope) {
        let run_id = envelope.run_id.clone();

        if let Err(e) = self.registry.mark_processing(&run_id, "Dequeued").await {
            tracing::error!(run_id = %run_id, error = %e, "failed to mark run processing, abandoning redelivery");
            return;
        }

        let (heartbeat_stop_tx, heartbeat_stop_rx) = watch::channel(false);
        let heartbeat_handle = {
            let queue = self.queue.clone();
            let handle = handle.clone();
            let extension = self.visibility_timeout;
            let interval = self.visibility_timeout / 3;
            let run_id = run_id.clone();
            tokio::spawn(async move {
                run_visibility_heartbeat(queue, handle, extension, interval, heartbeat_stop_rx, run_id).await
            })
        };

        let outcome = self.run_solver(&run_id, &envelope).await;

        let _ = heartbeat_stop_tx.send(true);
        let heartbeat_lost = heartbeat_handle.await.unwrap_or(false);

        if heartbeat_lost {
            let _ = self.registry.mark_failed(&run_id, "visibility_lost".to_string()).await;
            // Leave the message undeleted so another worker retries.
            return;
        }

        match outcome {
            Ok(()) => {
                let _ = self.queue.delete(&handle).await;
            }
            Err(JobOutcomeError::Cancelled) => {
                let _ = self.registry.mark_cancelled(&run_id).await;
                let _ = self.queue.delete(&handle).await;
            }
            Err(JobOutcomeError::Transient(msg)) => {
                tracing::warn!(run_id = %run_id, reason = %msg, "transient failure, leaving message for redelivery");
                let _ = self.registry.mark_failed(&run_id, msg).await;
            }
            Err(JobOutcomeError::Permanent(msg)) => {
                let _ = self.registry.mark_failed(&run_id, msg).await;
                let _ = self.queue.delete(&handle).await;
            }
        }
    }

    async fn run_solver(&self, run_id: &str, envelope: &JobEnvelope) -> Result<(), JobOutcomeError> {
        let case_bytes = self
            .store
            .get(&envelope.case_pointer)
            .await
            .map_err(|e| classify_store_error("failed to fetch case payload", e))?;
        let case: serde_json::Value =
            serde_json::from_slice(&case_bytes).map_err(|e| JobOutcomeError::Permanent(format!("corrupt case payload: {e}")))?;

        let callback = RegistryProgressCallback {
            registry: self.registry.clone(),
            run_id: run_id.to_string(),
        };

        let started = std::time::Instant::now();
        let output = self.solver.solve(run_id, &case, &callback).await;

        match output {
            Ok(output) => {
                let folder = self
                    .catalog
                    .allocate_next()
                    .await
                    .map_err(|e| classify_catalog_error("allocation failed", e))?;

                let results_bytes = bytes::Bytes::from(serde_json::to_vec(&output.results_json).expect("solver output is always serializable"));
                self.catalog
                    .put_results(&folder, results_bytes, &[])
                    .await
                    .map_err(|e| classify_catalog_error("upload failed", e))?;

                let metadata = ResultMetadata {
                    run_id: run_id.to_string(),
                    solver_type: output.solver_type,
                    solutions_count: output.solutions_count,
                    runtime_seconds: output.runtime_seconds.max(started.elapsed().as_secs_f64()),
                    created_at: catalog::now(),
                };
                self.catalog
                    .put_metadata(&folder, &metadata)
                    .await
                    .map_err(|e| classify_catalog_error("metadata upload failed", e))?;

                self.registry
                    .mark_completed(run_id, folder)
                    .await
                    .map_err(classify_registry_error)?;
                Ok(())
            }
            Err(SolverError::Cancelled) => Err(JobOutcomeError::Cancelled),
            Err(SolverError::Failed(msg)) => Err(JobOutcomeError::Permanent(msg)),
        }
    }
}

enum JobOutcomeError {
    Cancelled,
    Transient(String),
    Permanent(String),
}

use shiftplane_core::error::{CatalogError, Classify, FailureClass, RegistryError, StoreError};

fn classify_store_error(context: &str, e: StoreError) -> JobOutcomeError {
    match e.classify() {
        FailureClass::Transient => JobOutcomeError::Transient(format!("{context}: {e}")),
        FailureClass::Permanent => JobOutcomeError::Permanent(format!("{context}: {e}")),
    }
}

fn classify_catalog_error(context: &str, e: CatalogError) -> JobOutcomeError {
    match e.classify() {
        FailureClass::Transient => JobOutcomeError::Transient(format!("{context}: {e}")),
        FailureClass::Permanent => JobOutcomeError::Permanent(format!("{context}: {e}")),
    }
}

fn classify_registry_error(e: RegistryError) -> JobOutcomeError {
    match e.classify() {
        FailureClass::Transient => JobOutcomeError::Transient(e.to_string()),
        FailureClass::Permanent => JobOutcomeError::Permanent(e.to_string()),
    }
}

struct RegistryProgressCallback {
    registry: Arc<RunRegistry>,
    run_id: String,
}

#[async_trait::async_trait]
impl ProgressCallback for RegistryProgressCallback {
    async fn report(&self, pct: u8, message: &str) -> Result<(), Cancelled> {
        match self.registry.read(&self.run_id).await {
            Ok(record) if record.cancel_requested => return Err(Cancelled),
            _ => {}
        }
        if let Err(e) = self.registry.record_progress(&self.run_id, pct, message).await {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist progress update");
        }
        if let Err(e) = self.registry.append_log(&self.run_id, LogLevel::Info, message.to_string(), Some(pct)).await {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to append progress log entry");
        }
        Ok(())
    }
}

/// Extends the queue message's visibility every `interval`. Returns `true`
/// if two consecutive extensions failed (visibility lost), `false` if it
/// stopped cleanly because the job finished.
async fn run_visibility_heartbeat(
    queue: Arc<dyn Queue>,
    handle: ReceiptHandle,
    extension: Duration,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    run_id: String,
) -> bool {
    let mut consecutive_failures = 0u32;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => return false,
        }
        if *stop_rx.borrow() {
            return false;
        }
        match queue.extend_visibility(&handle, extension).await {
            Ok(()) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(run_id = %run_id, error = %e, consecutive_failures, "visibility extension failed");
                if consecutive_failures >= 2 {
                    return true;
                }
            }
        }
    }
}
