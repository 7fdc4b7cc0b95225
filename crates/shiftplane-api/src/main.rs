use std::sync::Arc;

use shiftplane_api::routes;
use shiftplane_api::state::AppState;
use shiftplane_core::config::Config;
use shiftplane_core::object_store_adapter::ObjectStoreAdapter;
use shiftplane_core::queue::ObjectStoreQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!(store_root = %config.store_root, region = %config.region, queue_name = %config.queue_name, "starting shiftplane-api");

    let backend = object_store::local::LocalFileSystem::new_with_prefix(&config.store_root)?;
    let store = ObjectStoreAdapter::new(Arc::new(backend));
    // Durable and keyed by `queue_name`, so `shiftplane-worker` running as a
    // separate process against the same store root sees the same jobs.
    let queue = Arc::new(ObjectStoreQueue::new(
        store.clone(),
        &config.queue_name,
        config.visibility_timeout,
        config.queue_cas_attempts,
    ));

    let state = AppState::new(config, store, queue);
    let app = routes::router(state);

    let addr = std::env::var("SHIFTPLANE_API_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
