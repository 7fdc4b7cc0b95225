//! Case Document Store HTTP surface.

use axum::extract::State;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use shiftplane_core::types::{ActiveCase, CasePayload};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn active(State(state): State<AppState>) -> Result<Json<ActiveCase>, ApiError> {
    match state.case_store.read_active().await? {
        Some(case) => Ok(Json(case)),
        None => Err(ApiError::NotFound("no active case saved".to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub status: &'static str,
    pub backup_key: String,
}

pub async fn save(State(state): State<AppState>, body: Bytes) -> Result<Json<SaveResponse>, ApiError> {
    let case: CasePayload = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("malformed case payload: {e}")))?;
    if case.is_empty() {
        return Err(ApiError::Validation("case payload has no top-level sections".to_string()));
    }
    let backup_key = state.case_store.save(case).await?;
    Ok(Json(SaveResponse {
        status: "saved",
        backup_key,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftplane_core::config::Config;
    use shiftplane_core::object_store_adapter::ObjectStoreAdapter;
    use shiftplane_core::queue::InMemoryQueue;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state() -> AppState {
        let store = ObjectStoreAdapter::new(Arc::new(object_store::memory::InMemory::new()));
        let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(60)));
        AppState::new(Config::default(), store, queue)
    }

    #[tokio::test]
    async fn active_missing_is_not_found() {
        let state = test_state();
        let err = active(State(state)).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn save_then_active_round_trips() {
        let state = test_state();
        save(State(state.clone()), Bytes::from_static(b"{\"shifts\":[]}")).await.unwrap();
        let got = active(State(state)).await.unwrap();
        assert!(got.case.document.contains_key("shifts"));
    }

    #[tokio::test]
    async fn save_rejects_empty_case() {
        let state = test_state();
        let err = save(State(state), Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
