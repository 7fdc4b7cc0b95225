//! Janitor: reclaims `jobs/{run_id}/*` input for
//! runs that reached a terminal state more than `ttl` ago. A standalone,
//! periodically-invoked maintenance pass rather than inline cleanup on
//! every state transition.

use std::time::Duration;

use crate::error::StoreError;
use crate::object_store_adapter::ObjectStoreAdapter;
use crate::registry::RunRegistry;

pub struct Janitor<'a> {
    store: &'a ObjectStoreAdapter,
    registry: &'a RunRegistry,
}

impl<'a> Janitor<'a> {
    pub fn new(store: &'a ObjectStoreAdapter, registry: &'a RunRegistry) -> Self {
        Self { store, registry }
    }

    /// Sweeps every run under `runs/` whose status is terminal and whose
    /// `updated_at` is older than `ttl`, deleting its `jobs/{run_id}/*`
    /// input. Returns the run ids that were reclaimed.
    pub async fn sweep(&self, ttl: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let run_prefixes = self.store.list_common_prefixes("runs/").await?;

        let mut reclaimed = Vec::new();
        for prefix in run_prefixes {
            let run_id = match prefix.trim_start_matches("runs/").trim_end_matches('/').to_string() {
                s if !s.is_empty() => s,
                _ => continue,
            };
            let record = match self.registry.read(&run_id).await {
                Ok(r) => r,
                Err(_) => continue,
            };
            if record.status.is_terminal() && record.updated_at < cutoff {
                self.store.delete_prefix(&format!("jobs/{run_id}/")).await?;
                reclaimed.push(run_id);
            }
        }
        Ok(reclaimed)
    }
}
