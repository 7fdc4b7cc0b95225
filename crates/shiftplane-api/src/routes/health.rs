//! `GET /health`. Reports a count of non-terminal runs by listing the
//! registry prefix and reading each run's status; informational only,
//! so a read failure for any one run is skipped rather than failing
//! the whole response.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_runs: u64,
    pub region: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut active_runs = 0u64;
    if let Ok(prefixes) = state.store.list_common_prefixes("runs/").await {
        for prefix in prefixes {
            let run_id = prefix.trim_start_matches("runs/").trim_end_matches('/');
            if run_id.is_empty() {
                continue;
            }
            if let Ok(record) = state.registry.read(run_id).await {
                if !record.status.is_terminal() {
                    active_runs += 1;
                }
            }
        }
    }

    Json(HealthResponse {
        status: "ok",
        active_runs,
        region: state.config.region.clone(),
    })
}
