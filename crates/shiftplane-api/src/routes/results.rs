//! Result Catalog + Download Service HTTP surface.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct FoldersResponse {
    pub folders: Vec<shiftplane_core::types::FolderSummary>,
}

pub async fn list_folders(State(state): State<AppState>) -> Result<Json<FoldersResponse>, ApiError> {
    let folders = state.catalog.list_folders().await?;
    Ok(Json(FoldersResponse { folders }))
}

fn is_valid_folder_name(name: &str) -> bool {
    match name.strip_prefix("Result_") {
        Some(suffix) => !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

pub async fn download_folder(State(state): State<AppState>, Path(name): Path<String>) -> Result<Response, ApiError> {
    if !is_valid_folder_name(&name) {
        return Err(ApiError::Validation(format!("invalid folder name: {name}")));
    }
    if !state.catalog.exists_and_ready(&name).await? {
        return Err(ApiError::NotFound(format!("result folder {name} not found")));
    }

    let size = state.catalog.folder_size(&name).await.ok();
    let reader = state.catalog.clone().spawn_zip_stream(name.clone());
    let stream = ReaderStream::new(reader);
    let body = Body::from_stream(stream);

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}.zip\""));
    if let Some(size) = size {
        if size > 0 {
            response = response.header(header::CONTENT_LENGTH, size.to_string());
        }
    }
    Ok(response.body(body).expect("response builder is always valid"))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
}

pub async fn delete_folder(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<DeleteResponse>, ApiError> {
    if !is_valid_folder_name(&name) {
        return Err(ApiError::Validation(format!("invalid folder name: {name}")));
    }
    if !state.catalog.exists_and_ready(&name).await? {
        return Err(ApiError::NotFound(format!("result folder {name} not found")));
    }
    state.catalog.delete(&name).await?;
    Ok(Json(DeleteResponse { status: "deleted" }))
}
