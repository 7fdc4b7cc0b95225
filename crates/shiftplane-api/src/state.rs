//! Shared application state threaded through every axum handler, built
//! once at startup from the immutable `Config`.

use std::sync::Arc;

use shiftplane_core::case_store::CaseDocumentStore;
use shiftplane_core::catalog::ResultCatalog;
use shiftplane_core::config::Config;
use shiftplane_core::object_store_adapter::ObjectStoreAdapter;
use shiftplane_core::queue::SharedQueue;
use shiftplane_core::registry::RunRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RunRegistry>,
    pub catalog: Arc<ResultCatalog>,
    pub case_store: Arc<CaseDocumentStore>,
    pub store: Arc<ObjectStoreAdapter>,
    pub queue: SharedQueue,
}

impl AppState {
    pub fn new(config: Config, store: ObjectStoreAdapter, queue: SharedQueue) -> Self {
        let registry = RunRegistry::new(store.clone(), config.registry_cas_attempts);
        let catalog = ResultCatalog::new(store.clone(), config.catalog_cas_attempts);
        let case_store = CaseDocumentStore::new(store.clone());
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            catalog: Arc::new(catalog),
            case_store: Arc::new(case_store),
            store: Arc::new(store),
            queue,
        }
    }
}
