//! Solver trait boundary: the CP-SAT model itself is an
//! external collaborator. This module only defines the callable contract
//! the Worker Runtime invokes it through — a narrow trait wired through
//! one entry point — rather than any solver internals.

use async_trait::async_trait;
use serde_json::Value;

/// Returned by the progress callback when the worker has observed
/// `cancel_requested=true`. This is the systems-language replacement for
/// the source's "raise to unwind" idiom.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("run was cancelled")]
pub struct Cancelled;

/// Callback the solver invokes periodically with its own progress. The
/// adapter decides how often to call this; the worker decides what happens
/// when it returns `Err(Cancelled)`.
#[async_trait]
pub trait ProgressCallback: Send + Sync {
    async fn report(&self, pct: u8, message: &str) -> Result<(), Cancelled>;
}

/// Outcome of a solver invocation, handed back to the worker for upload
/// and registry transition.
#[derive(Debug)]
pub struct SolverOutput {
    pub results_json: Value,
    pub solutions_count: u32,
    pub runtime_seconds: f64,
    pub solver_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("cancelled")]
    Cancelled,
    #[error("solver failed: {0}")]
    Failed(String),
}

impl From<Cancelled> for SolverError {
    fn from(_: Cancelled) -> Self {
        SolverError::Cancelled
    }
}

/// The callable the Worker Runtime invokes: accepts a case payload, a run
/// id, and a progress callback. The search/model internals
/// are a deliberate non-goal; only this contract is specified.
#[async_trait]
pub trait SolverJob: Send + Sync {
    async fn solve(
        &self,
        run_id: &str,
        case: &Value,
        progress: &(dyn ProgressCallback + '_),
    ) -> Result<SolverOutput, SolverError>;
}
