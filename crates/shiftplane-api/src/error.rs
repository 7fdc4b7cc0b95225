//! `ApiError` → HTTP translation layer: one JSON error body shape
//! (`{error, code, message}`) for every handler, with internal failures
//! logged server-side under a generated id and returned to the client as
//! an opaque reference rather than the underlying error text.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use shiftplane_core::error::{CatalogError, QueueError, RegistryError, StoreError};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.clone()),
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "case payload exceeds the configured maximum size".to_string(),
            ),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m.clone()),
            ApiError::Internal(e) => {
                let error_id = Uuid::new_v4();
                tracing::error!(error_id = %error_id, error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    format!("internal error (id={error_id})"),
                )
            }
        };
        let body = ErrorBody {
            error: code.to_string(),
            code: status.as_str().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(run_id) => ApiError::NotFound(format!("run {run_id} not found")),
            RegistryError::AlreadyExists(run_id) => ApiError::Conflict(format!("run {run_id} already exists")),
            RegistryError::Terminal { run_id, status } => {
                ApiError::Conflict(format!("run {run_id} is already terminal ({status})"))
            }
            RegistryError::CasExhausted { run_id, attempts } => {
                ApiError::Conflict(format!("could not update run {run_id} after {attempts} attempts"))
            }
            RegistryError::Store(s) => s.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(k) => ApiError::NotFound(k),
            StoreError::Conflict { key, reason } => ApiError::Conflict(format!("{key}: {reason}")),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(n) => ApiError::NotFound(n),
            CatalogError::NotReady(n) => ApiError::NotFound(n),
            CatalogError::Conflict { attempts } => {
                ApiError::Conflict(format!("result counter CAS exhausted after {attempts} attempts"))
            }
            CatalogError::Store(s) => s.into(),
            CatalogError::Zip(e) => ApiError::Internal(e),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::HandleExpired => ApiError::Conflict("queue handle expired".to_string()),
            QueueError::Transient(e) => ApiError::Unavailable(e.to_string()),
            QueueError::Permanent(e) => ApiError::Internal(e),
        }
    }
}
