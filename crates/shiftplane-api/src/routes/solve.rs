//! Job Dispatcher: `POST /solve`. Validates the payload, persists the case,
//! creates the registry record, then enqueues the job — never waits for
//! the solver, never leaves a dangling registry record on enqueue failure.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use shiftplane_core::types::{CasePayload, JobEnvelope, RunRecord};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SolveResponse {
    pub run_id: String,
    pub status: &'static str,
    pub progress: u8,
}

pub async fn solve(State(state): State<AppState>, body: Bytes) -> Result<(StatusCode, Json<SolveResponse>), ApiError> {
    if body.len() as u64 > state.config.max_case_size_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let case: CasePayload = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("malformed case payload: {e}")))?;
    if case.is_empty() {
        return Err(ApiError::Validation("case payload has no top-level sections".to_string()));
    }

    let run_id = Uuid::new_v4().simple().to_string();
    let case_pointer = format!("jobs/{run_id}/input.json");

    state
        .store
        .put(&case_pointer, Bytes::from(serde_json::to_vec(&case).expect("CasePayload is always serializable")), "application/json")
        .await
        .map_err(ApiError::from)?;

    state.registry.create(RunRecord::new(run_id.clone())).await.map_err(ApiError::from)?;

    let envelope = JobEnvelope {
        run_id: run_id.clone(),
        case_pointer,
    };
    if let Err(e) = state.queue.enqueue(envelope).await {
        let _ = state.registry.mark_failed(&run_id, "dispatch_failed".to_string()).await;
        tracing::error!(run_id = %run_id, error = %e, "enqueue failed, run marked failed");
        return Err(ApiError::Unavailable("could not enqueue job".to_string()));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SolveResponse {
            run_id,
            status: "processing",
            progress: 0,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use shiftplane_core::config::Config;
    use shiftplane_core::object_store_adapter::ObjectStoreAdapter;
    use shiftplane_core::queue::ObjectStoreQueue;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state() -> AppState {
        let store = ObjectStoreAdapter::new(Arc::new(object_store::memory::InMemory::new()));
        let queue = Arc::new(ObjectStoreQueue::new(store.clone(), "test", Duration::from_secs(60), 8));
        AppState::new(Config::default(), store, queue)
    }

    #[tokio::test]
    async fn rejects_empty_case_payload() {
        let state = test_state();
        let err = solve(State(state), Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_oversize_payload() {
        let mut config = Config::default();
        config.max_case_size_bytes = 4;
        let store = ObjectStoreAdapter::new(Arc::new(object_store::memory::InMemory::new()));
        let queue = Arc::new(ObjectStoreQueue::new(store.clone(), "test", Duration::from_secs(60), 8));
        let state = AppState::new(config, store, queue);
        let err = solve(State(state), Bytes::from_static(b"{\"shifts\":[]}")).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn happy_path_returns_processing() {
        let state = test_state();
        let (status, Json(resp)) = solve(State(state.clone()), Bytes::from_static(b"{\"shifts\":[1,2,3]}")).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(resp.status, "processing");
        assert_eq!(resp.progress, 0);

        let record = state.registry.read(&resp.run_id).await.unwrap();
        assert_eq!(record.status, shiftplane_core::types::RunStatus::Queued);
    }
}
