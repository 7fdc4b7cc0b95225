//! Reference `SolverJob` implementation used for local runs and tests.
//! Exists only to exercise the callback contract end-to-end; it is a
//! greedy round-robin assignment, not a constraint solver, per the
//! explicit non-goal on solver correctness.

use async_trait::async_trait;
use serde_json::{json, Value};
use shiftplane_core::solver::{ProgressCallback, SolverError, SolverJob, SolverOutput};

pub struct GreedyAssignmentSolver;

#[async_trait]
impl SolverJob for GreedyAssignmentSolver {
    async fn solve(&self, run_id: &str, case: &Value, progress: &(dyn ProgressCallback + '_)) -> Result<SolverOutput, SolverError> {
        let started = std::time::Instant::now();
        let shifts = case.get("shifts").and_then(Value::as_array).cloned().unwrap_or_default();
        let providers = case.get("providers").and_then(Value::as_array).cloned().unwrap_or_default();

        progress.report(10, "Validated case payload").await?;

        if providers.is_empty() || shifts.is_empty() {
            progress.report(100, "No shifts or providers to assign").await?;
            return Ok(SolverOutput {
                results_json: json!({ "assignments": [] }),
                solutions_count: 0,
                runtime_seconds: started.elapsed().as_secs_f64(),
                solver_type: "greedy-round-robin".to_string(),
            });
        }

        let mut assignments = Vec::with_capacity(shifts.len());
        for (i, shift) in shifts.iter().enumerate() {
            let provider = &providers[i % providers.len()];
            assignments.push(json!({ "shift": shift, "provider": provider }));

            if i % 4 == 0 {
                let pct = 10 + ((i as f64 / shifts.len() as f64) * 80.0) as u8;
                progress.report(pct.min(90), &format!("Assigned shift {i}")).await?;
            }
        }

        progress.report(100, "Assignment complete").await?;

        tracing::debug!(run_id, assignments = assignments.len(), "greedy solver finished");

        Ok(SolverOutput {
            results_json: json!({ "assignments": assignments }),
            solutions_count: 1,
            runtime_seconds: started.elapsed().as_secs_f64(),
            solver_type: "greedy-round-robin".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shiftplane_core::solver::Cancelled;
    use std::sync::atomic::{AtomicU8, Ordering};

    struct RecordingCallback {
        last_pct: AtomicU8,
    }

    #[async_trait]
    impl ProgressCallback for RecordingCallback {
        async fn report(&self, pct: u8, _message: &str) -> Result<(), Cancelled> {
            self.last_pct.store(pct, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_case_completes_with_zero_solutions() {
        let solver = GreedyAssignmentSolver;
        let callback = RecordingCallback { last_pct: AtomicU8::new(0) };
        let output = solver.solve("r1", &json!({}), &callback).await.unwrap();
        assert_eq!(output.solutions_count, 0);
        assert_eq!(callback.last_pct.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn assigns_shifts_round_robin() {
        let solver = GreedyAssignmentSolver;
        let callback = RecordingCallback { last_pct: AtomicU8::new(0) };
        let case = json!({ "shifts": [1, 2, 3, 4], "providers": ["a", "b"] });
        let output = solver.solve("r2", &case, &callback).await.unwrap();
        let assignments = output.results_json["assignments"].as_array().unwrap();
        assert_eq!(assignments.len(), 4);
        assert_eq!(assignments[0]["provider"], "a");
        assert_eq!(assignments[1]["provider"], "b");
    }

    struct CancellingCallback;

    #[async_trait]
    impl ProgressCallback for CancellingCallback {
        async fn report(&self, _pct: u8, _message: &str) -> Result<(), Cancelled> {
            Err(Cancelled)
        }
    }

    #[tokio::test]
    async fn propagates_cancellation_from_callback() {
        let solver = GreedyAssignmentSolver;
        let case = json!({ "shifts": [1], "providers": ["a"] });
        let err = solver.solve("r3", &case, &CancellingCallback).await.unwrap_err();
        assert!(matches!(err, SolverError::Cancelled));
    }
}
