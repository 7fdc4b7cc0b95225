use std::sync::Arc;
use std::time::Duration;

use shiftplane_core::catalog::ResultCatalog;
use shiftplane_core::config::Config;
use shiftplane_core::janitor::Janitor;
use shiftplane_core::object_store_adapter::ObjectStoreAdapter;
use shiftplane_core::queue::ObjectStoreQueue;
use shiftplane_core::registry::RunRegistry;
use shiftplane_worker::runtime::WorkerRuntime;
use shiftplane_worker::solver_demo::GreedyAssignmentSolver;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let worker_id = std::env::var("SHIFTPLANE_WORKER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    tracing::info!(worker_id = %worker_id, "starting shiftplane-worker");

    let backend = object_store::local::LocalFileSystem::new_with_prefix(&config.store_root)?;
    let store = ObjectStoreAdapter::new(Arc::new(backend));
    // Durable and keyed by `queue_name`, so this worker sees jobs enqueued
    // by `shiftplane-api` running as a separate process against the same
    // store root.
    let queue = Arc::new(ObjectStoreQueue::new(
        store.clone(),
        &config.queue_name,
        config.visibility_timeout,
        config.queue_cas_attempts,
    ));

    let registry = Arc::new(RunRegistry::new(store.clone(), config.registry_cas_attempts));
    let catalog = Arc::new(ResultCatalog::new(store.clone(), config.catalog_cas_attempts));
    let solver = Arc::new(GreedyAssignmentSolver);

    let runtime = WorkerRuntime::new(
        worker_id,
        queue,
        store.clone(),
        registry.clone(),
        catalog,
        solver,
        config.visibility_timeout,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor_ttl = config.job_input_ttl;
    let janitor_registry = registry.clone();
    let janitor_store = store.clone();
    let mut janitor_shutdown = shutdown_tx.subscribe();
    let janitor_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                _ = janitor_shutdown.changed() => break,
            }
            let janitor = Janitor::new(&janitor_store, &janitor_registry);
            match janitor.sweep(janitor_ttl).await {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    tracing::info!(count = reclaimed.len(), "janitor reclaimed orphaned job inputs");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "janitor sweep failed"),
            }
        }
    });

    let run_task = tokio::spawn(async move { runtime.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = run_task.await;
    let _ = janitor_task.await;
    Ok(())
}
