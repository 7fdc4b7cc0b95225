//! Wire and storage documents for the job orchestration plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a run. Terminal variants never transition further
/// (I4): `Completed`, `Failed`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// The authoritative per-run document stored at `runs/{run_id}/status.json`.
///
/// `etag` is the CAS version used by `RunRegistry::update`; it is bumped on
/// every successful write and is never exposed to HTTP clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result_folder: Option<String>,
    pub error: Option<String>,
    pub log_seq: u64,
    pub cancel_requested: bool,
    #[serde(skip)]
    pub etag: Option<String>,
}

impl RunRecord {
    pub fn new(run_id: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            status: RunStatus::Queued,
            progress: 0,
            message: "Optimization started".to_string(),
            created_at: now,
            updated_at: now,
            result_folder: None,
            error: None,
            log_seq: 0,
            cancel_requested: false,
            etag: None,
        }
    }
}

/// Severity of a single log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One append-only log segment under `runs/{run_id}/logs/{seq:010}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Present when this entry also carries a progress update; the
    /// `progress` event may be merged with `log`.
    pub progress: Option<u8>,
}

/// Small queue message; the case payload itself never rides on the queue
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub run_id: String,
    pub case_pointer: String,
}

/// `Result_N/metadata.json` — required sibling of `results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub run_id: String,
    pub solver_type: String,
    pub solutions_count: u32,
    pub runtime_seconds: f64,
    pub created_at: DateTime<Utc>,
}

/// Summary row returned by `GET /results/folders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSummary {
    pub name: String,
    pub created: DateTime<Utc>,
    pub file_count: u64,
    pub total_size: u64,
    pub runtime_seconds: f64,
    pub solutions_count: u32,
    pub solver_type: String,
}

/// Opaque case payload. The core never interprets its contents beyond size
/// and top-level shape validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasePayload {
    #[serde(flatten)]
    pub document: HashMap<String, serde_json::Value>,
}

impl CasePayload {
    /// `POST /solve` and `/case/save` reject a document with no top-level
    /// keys.
    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }
}

/// Active case document envelope stored at `case/active.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCase {
    pub case: CasePayload,
    pub last_modified: DateTime<Utc>,
}
