//! Run Registry: authoritative per-run state, CAS-guarded,
//! backed by the object store adapter. The read-modify-write-with-CAS loop
//! applies the same discipline a mutex-guarded in-memory store would use
//! for state mutation, now against a real compare-and-swap primitive
//! instead of a mutex.

use bytes::Bytes;
use chrono::Utc;

use crate::error::{RegistryError, StoreError};
use crate::object_store_adapter::ObjectStoreAdapter;
use crate::types::{LogEntry, LogLevel, RunRecord, RunStatus};

fn status_key(run_id: &str) -> String {
    format!("runs/{run_id}/status.json")
}

fn log_key(run_id: &str, seq: u64) -> String {
    format!("runs/{run_id}/logs/{seq:010}.json")
}

fn log_prefix(run_id: &str) -> String {
    format!("runs/{run_id}/logs/")
}

pub struct RunRegistry {
    store: ObjectStoreAdapter,
    cas_attempts: u32,
}

impl RunRegistry {
    pub fn new(store: ObjectStoreAdapter, cas_attempts: u32) -> Self {
        Self { store, cas_attempts }
    }

    /// `create` — fails with `AlreadyExists` if the key exists (I2).
    pub async fn create(&self, mut record: RunRecord) -> Result<RunRecord, RegistryError> {
        let key = status_key(&record.run_id);
        let body = serde_json::to_vec(&record).expect("RunRecord is always serializable");
        match self.store.put_if_absent(&key, Bytes::from(body), "application/json").await {
            Ok(outcome) => {
                record.etag = outcome.etag;
                Ok(record)
            }
            Err(StoreError::Conflict { .. }) => Err(RegistryError::AlreadyExists(record.run_id)),
            Err(e) => Err(RegistryError::Store(e)),
        }
    }

    pub async fn read(&self, run_id: &str) -> Result<RunRecord, RegistryError> {
        let key = status_key(run_id);
        let (bytes, etag) = self
            .store
            .get_with_etag(&key)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => RegistryError::NotFound(run_id.to_string()),
                other => RegistryError::Store(other),
            })?;
        let mut record: RunRecord =
            serde_json::from_slice(&bytes).map_err(|e| RegistryError::Store(StoreError::Permanent(e.into())))?;
        record.etag = etag;
        Ok(record)
    }

    /// Read-modify-write with CAS, rejecting mutation of terminal runs
    /// (I4). `mutator` returns `false` to signal "no-op, don't write" —
    /// used by the cancel-already-terminal 409 path.
    pub async fn update<F>(&self, run_id: &str, mutator: F) -> Result<RunRecord, RegistryError>
    where
        F: Fn(&mut RunRecord) -> Result<(), RegistryError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut record = self.read(run_id).await?;
            if record.status.is_terminal() {
                return Err(RegistryError::Terminal {
                    run_id: run_id.to_string(),
                    status: record.status.to_string(),
                });
            }
            mutator(&mut record)?;
            record.updated_at = Utc::now();
            let key = status_key(run_id);
            let body = serde_json::to_vec(&record).expect("RunRecord is always serializable");
            match self
                .store
                .put_if_match(&key, Bytes::from(body), "application/json", record.etag.clone())
                .await
            {
                Ok(outcome) => {
                    record.etag = outcome.etag;
                    return Ok(record);
                }
                Err(StoreError::Conflict { .. }) => {
                    if attempt >= self.cas_attempts {
                        return Err(RegistryError::CasExhausted {
                            run_id: run_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    continue;
                }
                Err(e) => return Err(RegistryError::Store(e)),
            }
        }
    }

    /// Applies a bounded, monotonic progress update from the worker's
    /// callback: progress is clamped so it never
    /// regresses within a run (I1 / testable properties §8).
    pub async fn record_progress(&self, run_id: &str, pct: u8, message: &str) -> Result<RunRecord, RegistryError> {
        self.update(run_id, |record| {
            record.progress = record.progress.max(pct.min(100));
            record.message = message.to_string();
            Ok(())
        })
        .await
    }

    pub async fn mark_processing(&self, run_id: &str, message: &str) -> Result<RunRecord, RegistryError> {
        self.update(run_id, |record| {
            record.status = RunStatus::Processing;
            record.message = message.to_string();
            Ok(())
        })
        .await
    }

    pub async fn mark_completed(&self, run_id: &str, result_folder: String) -> Result<RunRecord, RegistryError> {
        self.update(run_id, |record| {
            record.status = RunStatus::Completed;
            record.progress = 100;
            record.result_folder = Some(result_folder.clone());
            record.message = "Completed".to_string();
            Ok(())
        })
        .await
    }

    pub async fn mark_failed(&self, run_id: &str, error: String) -> Result<RunRecord, RegistryError> {
        self.update(run_id, |record| {
            record.status = RunStatus::Failed;
            record.error = Some(error.clone());
            Ok(())
        })
        .await
    }

    pub async fn mark_cancelled(&self, run_id: &str) -> Result<RunRecord, RegistryError> {
        self.update(run_id, |record| {
            record.status = RunStatus::Cancelled;
            record.message = "Cancelled".to_string();
            Ok(())
        })
        .await
    }

    /// `POST /stop`: 200 if the flag is newly set, 404 via `NotFound`,
    /// 409 via `Terminal`.
    pub async fn request_cancel(&self, run_id: &str) -> Result<RunRecord, RegistryError> {
        self.update(run_id, |record| {
            record.cancel_requested = true;
            Ok(())
        })
        .await
    }

    /// Advances `log_seq` under the same CAS discipline as `update`, then
    /// writes the log segment. Mirrors `ProcessStore::append_event`'s
    /// seq-then-write ordering.
    pub async fn append_log(&self, run_id: &str, level: LogLevel, message: String, progress: Option<u8>) -> Result<LogEntry, RegistryError> {
        let record = self
            .update(run_id, |record| {
                record.log_seq += 1;
                Ok(())
            })
            .await?;
        let entry = LogEntry {
            seq: record.log_seq,
            ts: Utc::now(),
            level,
            message,
            progress,
        };
        let body = serde_json::to_vec(&entry).expect("LogEntry is always serializable");
        self.store
            .put(&log_key(run_id, entry.seq), Bytes::from(body), "application/json")
            .await
            .map_err(RegistryError::Store)?;
        Ok(entry)
    }

    /// Enumerates log segments with `seq > since_seq` in ascending order
    ///.
    pub async fn list_logs(&self, run_id: &str, since_seq: u64) -> Result<Vec<LogEntry>, RegistryError> {
        let objects = self.store.list(&log_prefix(run_id)).await.map_err(RegistryError::Store)?;
        let mut entries = Vec::with_capacity(objects.len());
        for obj in objects {
            let bytes = self.store.get(&obj.key).await.map_err(RegistryError::Store)?;
            let entry: LogEntry =
                serde_json::from_slice(&bytes).map_err(|e| RegistryError::Store(StoreError::Permanent(e.into())))?;
            if entry.seq > since_seq {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store_adapter::ObjectStoreAdapter;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn registry() -> RunRegistry {
        RunRegistry::new(ObjectStoreAdapter::new(Arc::new(InMemory::new())), 8)
    }

    #[tokio::test]
    async fn create_rejects_duplicate_run_id() {
        let reg = registry();
        reg.create(RunRecord::new("r1".into())).await.unwrap();
        let err = reg.create(RunRecord::new("r1".into())).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn progress_never_regresses() {
        let reg = registry();
        reg.create(RunRecord::new("r2".into())).await.unwrap();
        reg.record_progress("r2", 40, "working").await.unwrap();
        let after = reg.record_progress("r2", 10, "stale update").await.unwrap();
        assert_eq!(after.progress, 40);
    }

    #[tokio::test]
    async fn terminal_run_rejects_further_mutation() {
        let reg = registry();
        reg.create(RunRecord::new("r3".into())).await.unwrap();
        reg.mark_completed("r3", "Result_1".into()).await.unwrap();
        let err = reg.record_progress("r3", 50, "too late").await.unwrap_err();
        assert!(matches!(err, RegistryError::Terminal { .. }));
    }

    #[tokio::test]
    async fn append_log_is_strictly_increasing() {
        let reg = registry();
        reg.create(RunRecord::new("r4".into())).await.unwrap();
        let e1 = reg.append_log("r4", LogLevel::Info, "a".into(), None).await.unwrap();
        let e2 = reg.append_log("r4", LogLevel::Info, "b".into(), None).await.unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
        let logs = reg.list_logs("r4", 0).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn list_logs_resumes_from_since() {
        let reg = registry();
        reg.create(RunRecord::new("r5".into())).await.unwrap();
        for i in 0..5 {
            reg.append_log("r5", LogLevel::Info, format!("line {i}"), None).await.unwrap();
        }
        let logs = reg.list_logs("r5", 3).await.unwrap();
        assert_eq!(logs.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn read_missing_run_is_not_found() {
        let reg = registry();
        let err = reg.read("nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_request_on_terminal_run_is_rejected() {
        let reg = registry();
        reg.create(RunRecord::new("r6".into())).await.unwrap();
        reg.mark_cancelled("r6").await.unwrap();
        let err = reg.request_cancel("r6").await.unwrap_err();
        assert!(matches!(err, RegistryError::Terminal { .. }));
    }
}
