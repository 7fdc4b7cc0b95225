//! Queue adapter: at-least-once delivery with a visibility
//! timeout. `InMemoryQueue` pairs a ready queue with an inflight map keyed
//! by receipt handle, adding the one semantic a plain FIFO queue lacks:
//! automatic redelivery once a handle's visibility window expires.
//! `ObjectStoreQueue` gives the same contract a durable, cross-process
//! home by applying the read-modify-write-with-CAS loop `RunRegistry`
//! already uses, to a single queue-state document in the object store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{QueueError, StoreError};
use crate::object_store_adapter::ObjectStoreAdapter;
use crate::types::JobEnvelope;

/// Opaque handle returned by `receive`, required by `extend_visibility`
/// and `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError>;
    async fn receive(&self, max_wait: Duration) -> Result<Option<(ReceiptHandle, JobEnvelope)>, QueueError>;
    async fn extend_visibility(&self, handle: &ReceiptHandle, extension: Duration) -> Result<(), QueueError>;
    async fn delete(&self, handle: &ReceiptHandle) -> Result<(), QueueError>;
}

struct Inflight {
    envelope: JobEnvelope,
    visible_at: Instant,
}

struct Inner {
    ready: VecDeque<JobEnvelope>,
    inflight: HashMap<String, Inflight>,
}

/// In-process queue used for local development and tests. Production
/// deployments would swap in a durable backend behind the same [`Queue`]
/// trait without touching the dispatcher or worker.
pub struct InMemoryQueue {
    visibility_timeout: Duration,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                inflight: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Moves any inflight message whose visibility has expired back onto
    /// the ready queue. Called at the top of every `receive`.
    async fn reap_expired(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired: Vec<String> = inner
            .inflight
            .iter()
            .filter(|(_, job)| job.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some(job) = inner.inflight.remove(&handle) {
                inner.ready.push_back(job.envelope);
            }
        }
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.ready.push_back(envelope);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<(ReceiptHandle, JobEnvelope)>, QueueError> {
        let deadline = Instant::now() + max_wait;
        loop {
            self.reap_expired().await;
            {
                let mut inner = self.inner.lock().await;
                if let Some(envelope) = inner.ready.pop_front() {
                    let handle = ReceiptHandle(Uuid::new_v4().to_string());
                    inner.inflight.insert(
                        handle.0.clone(),
                        Inflight {
                            envelope: envelope.clone(),
                            visible_at: Instant::now() + self.visibility_timeout,
                        },
                    );
                    return Ok(Some((handle, envelope)));
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }

    async fn extend_visibility(&self, handle: &ReceiptHandle, extension: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.inflight.get_mut(&handle.0) {
            Some(job) => {
                job.visible_at = Instant::now() + extension;
                Ok(())
            }
            None => Err(QueueError::HandleExpired),
        }
    }

    async fn delete(&self, handle: &ReceiptHandle) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.inflight.remove(&handle.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InflightEntry {
    envelope: JobEnvelope,
    visible_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueState {
    ready: VecDeque<JobEnvelope>,
    inflight: HashMap<String, InflightEntry>,
}

impl QueueState {
    fn reap_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some(entry) = self.inflight.remove(&handle) {
                self.ready.push_back(entry.envelope);
            }
        }
    }
}

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Durable queue shared by every process that names the same `queue_name`
/// against the same object store: the API's dispatcher and the worker's
/// runtime read and write the same `queue/{queue_name}/state.json`
/// document, so a job enqueued by one process is visible to the other.
pub struct ObjectStoreQueue {
    store: ObjectStoreAdapter,
    key: String,
    visibility_timeout: Duration,
    cas_attempts: u32,
}

impl ObjectStoreQueue {
    pub fn new(store: ObjectStoreAdapter, queue_name: &str, visibility_timeout: Duration, cas_attempts: u32) -> Self {
        Self {
            store,
            key: format!("queue/{queue_name}/state.json"),
            visibility_timeout,
            cas_attempts,
        }
    }

    async fn read_state(&self) -> Result<(QueueState, Option<String>), QueueError> {
        match self.store.get_with_etag(&self.key).await {
            Ok((bytes, etag)) => {
                let state: QueueState =
                    serde_json::from_slice(&bytes).map_err(|e| QueueError::Permanent(anyhow::Error::new(e)))?;
                Ok((state, etag))
            }
            Err(StoreError::NotFound(_)) => Ok((QueueState::default(), None)),
            Err(e) => Err(store_error_to_queue_error(e)),
        }
    }

    /// Read-modify-write loop bounded at `cas_attempts`, the same
    /// discipline `RunRegistry::update` uses for the run status document.
    async fn update<F, T>(&self, mutator: F) -> Result<T, QueueError>
    where
        F: Fn(&mut QueueState) -> T,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (mut state, etag) = self.read_state().await?;
            let result = mutator(&mut state);
            let body = serde_json::to_vec(&state).expect("QueueState is always serializable");
            let put = if etag.is_some() {
                self.store.put_if_match(&self.key, Bytes::from(body), "application/json", etag).await
            } else {
                self.store.put_if_absent(&self.key, Bytes::from(body), "application/json").await
            };
            match put {
                Ok(_) => return Ok(result),
                Err(StoreError::Conflict { .. }) => {
                    if attempt >= self.cas_attempts {
                        return Err(QueueError::Transient(anyhow::anyhow!(
                            "queue state compare-and-swap exhausted after {attempt} attempts"
                        )));
                    }
                    let jitter_ms = rand::thread_rng().gen_range(5..40);
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    continue;
                }
                Err(e) => return Err(store_error_to_queue_error(e)),
            }
        }
    }
}

#[async_trait]
impl Queue for ObjectStoreQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<(), QueueError> {
        self.update(|state| state.ready.push_back(envelope.clone())).await
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<(ReceiptHandle, JobEnvelope)>, QueueError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let visibility_timeout = self.visibility_timeout;
            let received = self
                .update(move |state| {
                    state.reap_expired(Utc::now());
                    state.ready.pop_front().map(|envelope| {
                        let handle = Uuid::new_v4().to_string();
                        state.inflight.insert(
                            handle.clone(),
                            InflightEntry {
                                envelope: envelope.clone(),
                                visible_at: Utc::now() + visibility_timeout,
                            },
                        );
                        (ReceiptHandle(handle), envelope)
                    })
                })
                .await?;
            if let Some(result) = received {
                return Ok(Some(result));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(QUEUE_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1)))).await;
        }
    }

    async fn extend_visibility(&self, handle: &ReceiptHandle, extension: Duration) -> Result<(), QueueError> {
        let handle_id = handle.0.clone();
        self.update(move |state| match state.inflight.get_mut(&handle_id) {
            Some(entry) => {
                entry.visible_at = Utc::now() + extension;
                true
            }
            None => false,
        })
        .await
        .and_then(|found| if found { Ok(()) } else { Err(QueueError::HandleExpired) })
    }

    async fn delete(&self, handle: &ReceiptHandle) -> Result<(), QueueError> {
        let handle_id = handle.0.clone();
        self.update(move |state| {
            state.inflight.remove(&handle_id);
        })
        .await
    }
}

fn store_error_to_queue_error(e: StoreError) -> QueueError {
    match e {
        StoreError::Transient { .. } => QueueError::Transient(anyhow::Error::new(e)),
        other => QueueError::Permanent(anyhow::Error::new(other)),
    }
}

pub type SharedQueue = Arc<dyn Queue>;

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(run_id: &str) -> JobEnvelope {
        JobEnvelope {
            run_id: run_id.to_string(),
            case_pointer: format!("jobs/{run_id}/input.json"),
        }
    }

    #[tokio::test]
    async fn enqueue_receive_delete_round_trip() {
        let q = InMemoryQueue::new(Duration::from_secs(60));
        q.enqueue(envelope("r1")).await.unwrap();
        let (handle, env) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(env.run_id, "r1");
        q.delete(&handle).await.unwrap();
        let none = q.receive(Duration::from_millis(50)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn expired_visibility_redelivers() {
        let q = InMemoryQueue::new(Duration::from_millis(20));
        q.enqueue(envelope("r2")).await.unwrap();
        let (handle1, _) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let (handle2, env2) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(env2.run_id, "r2");
        assert_ne!(handle1, handle2);
    }

    #[tokio::test]
    async fn extend_visibility_prevents_redelivery() {
        let q = InMemoryQueue::new(Duration::from_millis(30));
        q.enqueue(envelope("r3")).await.unwrap();
        let (handle, _) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        q.extend_visibility(&handle, Duration::from_millis(200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let none = q.receive(Duration::from_millis(20)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn delete_unknown_handle_is_ok() {
        let q = InMemoryQueue::new(Duration::from_secs(1));
        q.delete(&ReceiptHandle("nope".into())).await.unwrap();
    }

    fn object_store_queue(visibility_timeout: Duration) -> ObjectStoreQueue {
        let store = ObjectStoreAdapter::new(Arc::new(object_store::memory::InMemory::new()));
        ObjectStoreQueue::new(store, "test-queue", visibility_timeout, 8)
    }

    #[tokio::test]
    async fn object_store_queue_round_trips() {
        let q = object_store_queue(Duration::from_secs(60));
        q.enqueue(envelope("r1")).await.unwrap();
        let (handle, env) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(env.run_id, "r1");
        q.delete(&handle).await.unwrap();
        let none = q.receive(Duration::from_millis(50)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn object_store_queue_shares_state_across_handles_to_the_same_store() {
        let store = ObjectStoreAdapter::new(Arc::new(object_store::memory::InMemory::new()));
        let dispatcher_side = ObjectStoreQueue::new(store.clone(), "shared", Duration::from_secs(60), 8);
        let worker_side = ObjectStoreQueue::new(store, "shared", Duration::from_secs(60), 8);

        dispatcher_side.enqueue(envelope("cross-process")).await.unwrap();
        let (_, env) = worker_side.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(env.run_id, "cross-process");
    }

    #[tokio::test]
    async fn object_store_queue_expired_visibility_redelivers() {
        let q = object_store_queue(Duration::from_millis(20));
        q.enqueue(envelope("r2")).await.unwrap();
        let (handle1, _) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let (handle2, env2) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(env2.run_id, "r2");
        assert_ne!(handle1, handle2);
    }

    #[tokio::test]
    async fn object_store_queue_extend_visibility_prevents_redelivery() {
        let q = object_store_queue(Duration::from_millis(30));
        q.enqueue(envelope("r3")).await.unwrap();
        let (handle, _) = q.receive(Duration::from_millis(100)).await.unwrap().unwrap();
        q.extend_visibility(&handle, Duration::from_millis(200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let none = q.receive(Duration::from_millis(20)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn object_store_queue_extend_visibility_on_unknown_handle_is_expired() {
        let q = object_store_queue(Duration::from_secs(60));
        let err = q
            .extend_visibility(&ReceiptHandle("nope".into()), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::HandleExpired));
    }
}
