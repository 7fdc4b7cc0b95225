pub mod case;
pub mod health;
pub mod results;
pub mod solve;
pub mod status;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/solve", post(solve::solve))
        .route("/status/:run_id", get(status::status))
        .route("/logs/:run_id", get(status::logs))
        .route("/stop/:run_id", post(status::stop))
        .route("/results/folders", get(results::list_folders))
        .route("/download/folder/:name", get(results::download_folder))
        .route("/results/delete/:name", delete(results::delete_folder))
        .route("/case/active", get(case::active))
        .route("/case/save", post(case::save))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
