//! Status & Log Service: `GET /status/{run_id}`,
//! `GET /logs/{run_id}?since=N` (SSE), `POST /stop/{run_id}`. The SSE
//! handler is a poll loop over the registry rather than an in-process
//! broadcast channel, so a reconnecting client resumes purely from
//! object-store state instead of a channel it could never have subscribed
//! to before the server restarted.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use shiftplane_core::types::{RunRecord, RunStatus};

use crate::error::ApiError;
use crate::state::AppState;

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RunRecord> for StatusResponse {
    fn from(r: RunRecord) -> Self {
        Self {
            run_id: r.run_id,
            status: r.status,
            progress: r.progress,
            message: r.message,
            result_folder: r.result_folder,
            error: r.error,
        }
    }
}

pub async fn status(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<StatusResponse>, ApiError> {
    let record = state.registry.read(&run_id).await?;
    Ok(Json(record.into()))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub since: u64,
}

pub async fn logs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Validate the run exists before opening the long-lived response
    //.
    state.registry.read(&run_id).await?;

    let stream = async_stream::stream! {
        let mut since = query.since;
        let mut last_heartbeat = tokio::time::Instant::now();
        loop {
            let entries = match state.registry.list_logs(&run_id, since).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(run_id = %run_id, error = %e, "log poll failed");
                    Vec::new()
                }
            };

            for entry in &entries {
                since = entry.seq;
                let payload = serde_json::json!({
                    "type": "log",
                    "seq": entry.seq,
                    "ts": entry.ts,
                    "level": entry.level,
                    "message": entry.message,
                });
                yield Ok(Event::default().event("log").data(payload.to_string()));
                if let Some(pct) = entry.progress {
                    let progress_payload = serde_json::json!({
                        "type": "progress",
                        "seq": entry.seq,
                        "progress": pct,
                        "message": entry.message,
                    });
                    yield Ok(Event::default().event("progress").data(progress_payload.to_string()));
                }
            }

            match state.registry.read(&run_id).await {
                Ok(record) if record.status.is_terminal() => {
                    let payload = serde_json::json!({ "type": "end", "status": record.status });
                    yield Ok(Event::default().event("end").data(payload.to_string()));
                    break;
                }
                _ => {}
            }

            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                let payload = serde_json::json!({ "type": "heartbeat", "ts": chrono::Utc::now() });
                yield Ok(Event::default().event("heartbeat").data(payload.to_string()));
                last_heartbeat = tokio::time::Instant::now();
            }

            tokio::time::sleep(LOG_POLL_INTERVAL).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("ping")))
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: &'static str,
}

pub async fn stop(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<StopResponse>, ApiError> {
    state.registry.request_cancel(&run_id).await?;
    Ok(Json(StopResponse {
        status: "cancel_requested",
    }))
}
