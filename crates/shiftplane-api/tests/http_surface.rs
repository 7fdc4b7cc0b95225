//! Integration tests exercising the HTTP surface end-to-end through the
//! router, driving in-process requests with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use shiftplane_api::routes;
use shiftplane_api::state::AppState;
use shiftplane_core::config::Config;
use shiftplane_core::object_store_adapter::ObjectStoreAdapter;
use shiftplane_core::queue::ObjectStoreQueue;
use tower::ServiceExt;

fn app() -> axum::Router {
    let store = ObjectStoreAdapter::new(Arc::new(object_store::memory::InMemory::new()));
    let queue = Arc::new(ObjectStoreQueue::new(store.clone(), "test", Duration::from_secs(60), 8));
    routes::router(AppState::new(Config::default(), store, queue))
}

#[tokio::test]
async fn solve_then_status_happy_path() {
    let app = app();

    let solve_req = Request::builder()
        .method("POST")
        .uri("/solve")
        .header("content-type", "application/json")
        .body(Body::from(json!({"shifts": [1, 2, 3], "providers": ["a", "b"]}).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(solve_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let run_id = parsed["run_id"].as_str().unwrap().to_string();
    assert_eq!(parsed["status"], "processing");

    let status_req = Request::builder().uri(format!("/status/{run_id}")).body(Body::empty()).unwrap();
    let resp = app.oneshot(status_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn solve_rejects_empty_payload_with_400() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/solve")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_unknown_run_is_404() {
    let app = app();
    let req = Request::builder().uri("/status/does-not-exist").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn download_unknown_folder_is_404() {
    let app = app();
    let req = Request::builder().uri("/download/folder/Result_1").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_rejects_malformed_folder_name() {
    let app = app();
    let req = Request::builder().uri("/download/folder/..%2fetc").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert!(resp.status() == StatusCode::BAD_REQUEST || resp.status() == StatusCode::NOT_FOUND);
}
