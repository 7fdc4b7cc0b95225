//! Immutable process configuration, built once at startup and threaded
//! through every constructor rather than read ad hoc from the environment
//! at each call site.

use std::time::Duration;

/// Configuration shared by `shiftplane-api` and `shiftplane-worker`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the durable queue the dispatcher enqueues to and the worker
    /// receives from.
    pub queue_name: String,
    /// Root of the object store: a local directory in dev, a bucket name
    /// against a cloud backend in production.
    pub store_root: String,
    pub region: String,
    /// Queue visibility timeout.
    pub visibility_timeout: Duration,
    /// Maximum accepted case payload size in bytes.
    pub max_case_size_bytes: u64,
    /// Bound on CAS retry attempts for the run registry.
    pub registry_cas_attempts: u32,
    /// Bound on CAS retry attempts for the result counter.
    pub catalog_cas_attempts: u32,
    /// Bound on CAS retry attempts for the durable queue's state document.
    pub queue_cas_attempts: u32,
    /// Age after which a terminal run's `jobs/{run_id}/*` input is
    /// reclaimed by the janitor.
    pub job_input_ttl: Duration,
    /// Long-poll duration for queue receive.
    pub receive_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_name: "shiftplane-jobs".to_string(),
            store_root: "./data".to_string(),
            region: "local".to_string(),
            visibility_timeout: Duration::from_secs(12 * 3600),
            max_case_size_bytes: 10 * 1024 * 1024,
            registry_cas_attempts: 8,
            catalog_cas_attempts: 16,
            queue_cas_attempts: 16,
            job_input_ttl: Duration::from_secs(7 * 24 * 3600),
            receive_wait: Duration::from_secs(20),
        }
    }
}

impl Config {
    /// Builds configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset. Called exactly once at
    /// process start; nothing downstream reads `std::env` directly.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("SHIFTPLANE_QUEUE_NAME") {
            cfg.queue_name = v;
        }
        if let Ok(v) = std::env::var("SHIFTPLANE_STORE_ROOT") {
            cfg.store_root = v;
        }
        if let Ok(v) = std::env::var("SHIFTPLANE_REGION") {
            cfg.region = v;
        }
        if let Ok(v) = std::env::var("SHIFTPLANE_VISIBILITY_TIMEOUT_SECS") {
            cfg.visibility_timeout = Duration::from_secs(v.parse()?);
        }
        if let Ok(v) = std::env::var("SHIFTPLANE_MAX_CASE_SIZE_BYTES") {
            cfg.max_case_size_bytes = v.parse()?;
        }
        if let Ok(v) = std::env::var("SHIFTPLANE_JOB_INPUT_TTL_SECS") {
            cfg.job_input_ttl = Duration::from_secs(v.parse()?);
        }

        Ok(cfg)
    }
}
