//! Orchestration (component L): the checkpointed five-phase driver, its
//! post-processing convergence loop, and the run manifest.

pub mod checkpoint;
pub mod manifest;
pub mod phases;

pub use checkpoint::{cleanup_checkpoints, read_checkpoint, write_checkpoint, CleanupReport, Checkpoint};
pub use manifest::{build_manifest, RunManifest, RunStatus};
pub use phases::PHASES;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::observability::{CounterRegistry, OperationLog};

/// One phase's unit of work. Receives the orchestrator's shared counters and
/// operation log and returns a JSON-serializable payload to checkpoint.
pub trait PhaseRunner {
    /// Execute the phase.
    fn run(&mut self, counters: &CounterRegistry, operations: &OperationLog) -> Result<serde_json::Value>;
}

impl<F> PhaseRunner for F
where
    F: FnMut(&CounterRegistry, &OperationLog) -> Result<serde_json::Value>,
{
    fn run(&mut self, counters: &CounterRegistry, operations: &OperationLog) -> Result<serde_json::Value> {
        self(counters, operations)
    }
}

/// A post-processing stage run during `phase3_post_processing` (validator,
/// deduplicator, disambiguator). Reports whether it changed anything so the
/// loop knows when to stop.
pub trait PostProcessor {
    /// Stable name used in the operation log.
    fn name(&self) -> &str;
    /// Apply this processor once; return `true` if it changed the working set.
    fn apply(&mut self, counters: &CounterRegistry, operations: &OperationLog) -> Result<bool>;
}

/// Run `processors` in order, repeating the full pass until none of them
/// reports `changed == true` or `max_iterations` passes have run. Returns the
/// number of passes actually performed.
pub fn run_post_processing(processors: &mut [Box<dyn PostProcessor>], counters: &CounterRegistry, operations: &OperationLog, max_iterations: usize) -> Result<usize> {
    for iteration in 0..max_iterations.max(1) {
        let mut changed_any = false;
        for processor in processors.iter_mut() {
            let changed = processor.apply(counters, operations)?;
            operations.record("phase3_post_processing", processor.name(), serde_json::json!({"iteration": iteration, "changed": changed}));
            changed_any = changed_any || changed;
        }
        if !changed_any {
            return Ok(iteration + 1);
        }
    }
    Ok(max_iterations.max(1))
}

/// Drives the eight-checkpoint phase sequence (spec §4.L), writing a
/// checkpoint after every phase and assembling the final [`RunManifest`].
/// Phase failures are captured, not propagated: `run` always returns `Ok`
/// with a manifest whose `status` reflects success or failure, matching the
/// orchestrator's "capture, finalize, report non-zero" recovery contract.
pub struct Orchestrator {
    run_id: String,
    environment: String,
    policy_version: String,
    checkpoint_dir: PathBuf,
    counters: CounterRegistry,
    operations: OperationLog,
}

impl Orchestrator {
    /// Construct a driver for one run.
    #[must_use]
    pub fn new(run_id: impl Into<String>, environment: impl Into<String>, policy_version: impl Into<String>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        let run_id = run_id.into();
        Self {
            counters: CounterRegistry::new(Some(run_id.clone())),
            operations: OperationLog::new(),
            run_id,
            environment: environment.into(),
            policy_version: policy_version.into(),
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// The shared counter registry, for wiring into stage processors.
    #[must_use]
    pub fn counters(&self) -> &CounterRegistry {
        &self.counters
    }

    /// The shared operation log, for wiring into stage processors.
    #[must_use]
    pub fn operations(&self) -> &OperationLog {
        &self.operations
    }

    /// Run the phases named in [`PHASES`], starting from `resume_phase` (or
    /// the phase after the last completed checkpoint when `None`). `runners`
    /// supplies a callable per phase name; any phase without a registered
    /// runner is skipped with an empty checkpoint payload. `now` supplies
    /// timestamps (injected so callers can keep this deterministic in tests).
    pub fn run(
        &mut self,
        mut runners: BTreeMap<&'static str, Box<dyn PhaseRunner>>,
        resume_phase: Option<&str>,
        artifacts: Vec<String>,
        now: impl Fn() -> DateTime<Utc>,
    ) -> Result<RunManifest> {
        let started_at = now();
        let start_index = checkpoint::resume_index(&self.checkpoint_dir, resume_phase)?;
        let mut performance_ms = BTreeMap::new();
        let mut failed_phase = None;

        for phase in PHASES.iter().skip(start_index) {
            let clock = Instant::now();
            let outcome = match runners.get_mut(phase) {
                Some(runner) => runner.run(&self.counters, &self.operations),
                None => Ok(serde_json::json!({})),
            };
            performance_ms.insert((*phase).to_string(), clock.elapsed().as_millis() as u64);

            match outcome {
                Ok(state) => {
                    write_checkpoint(&self.checkpoint_dir, &self.run_id, phase, state, now())?;
                    self.operations.record(phase, "phase_complete", serde_json::json!({}));
                }
                Err(e) => {
                    self.operations.record(phase, "phase_failed", serde_json::json!({"error": e.to_string()}));
                    failed_phase = Some((*phase).to_string());
                    break;
                }
            }
        }

        let status = if failed_phase.is_some() { RunStatus::Failed } else { RunStatus::Success };
        let mut phase_stats = BTreeMap::new();
        phase_stats.insert("pipeline".to_string(), self.counters.snapshot());

        Ok(build_manifest(
            self.run_id.clone(),
            started_at,
            now(),
            status,
            self.environment.clone(),
            self.policy_version.clone(),
            phase_stats,
            self.operations.snapshot(),
            performance_ms,
            checkpoint::list_checkpoints(&self.checkpoint_dir),
            artifacts,
            failed_phase,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct CountingProcessor {
        calls: usize,
        stop_after: usize,
    }

    impl PostProcessor for CountingProcessor {
        fn name(&self) -> &str {
            "counting"
        }
        fn apply(&mut self, _counters: &CounterRegistry, _operations: &OperationLog) -> Result<bool> {
            self.calls += 1;
            Ok(self.calls < self.stop_after)
        }
    }

    #[test]
    fn post_processing_stops_when_nothing_changes() {
        let counters = CounterRegistry::new(None);
        let operations = OperationLog::new();
        let mut processors: Vec<Box<dyn PostProcessor>> = vec![Box::new(CountingProcessor { calls: 0, stop_after: 3 })];
        let iterations = run_post_processing(&mut processors, &counters, &operations, 10).unwrap();
        assert_eq!(iterations, 3);
    }

    #[test]
    fn post_processing_respects_max_iterations_cap() {
        let counters = CounterRegistry::new(None);
        let operations = OperationLog::new();
        let mut processors: Vec<Box<dyn PostProcessor>> = vec![Box::new(CountingProcessor { calls: 0, stop_after: 100 })];
        let iterations = run_post_processing(&mut processors, &counters, &operations, 2).unwrap();
        assert_eq!(iterations, 2);
    }

    #[test]
    fn orchestrator_runs_all_phases_and_writes_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new("run1", "testing", "v1", dir.path());
        let runners: BTreeMap<&'static str, Box<dyn PhaseRunner>> = BTreeMap::new();
        let manifest = orchestrator.run(runners, None, vec![], Utc::now).unwrap();
        assert_eq!(manifest.status, RunStatus::Success);
        assert_eq!(manifest.checkpoints.len(), PHASES.len());
    }

    #[test]
    fn orchestrator_captures_phase_failure_in_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new("run1", "testing", "v1", dir.path());
        let mut runners: BTreeMap<&'static str, Box<dyn PhaseRunner>> = BTreeMap::new();
        runners.insert(
            "phase1_level1",
            Box::new(|_: &CounterRegistry, _: &OperationLog| -> Result<serde_json::Value> { Err(Error::Configuration("boom".into())) }),
        );
        let manifest = orchestrator.run(runners, None, vec![], Utc::now).unwrap();
        assert_eq!(manifest.status, RunStatus::Failed);
        assert_eq!(manifest.failed_phase.as_deref(), Some("phase1_level1"));
        assert_eq!(manifest.checkpoints.len(), 1);
    }

    #[test]
    fn orchestrator_resumes_from_explicit_phase() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new("run1", "testing", "v1", dir.path());
        let runners: BTreeMap<&'static str, Box<dyn PhaseRunner>> = BTreeMap::new();
        let manifest = orchestrator.run(runners, Some("phase5_finalization"), vec![], Utc::now).unwrap();
        assert_eq!(manifest.checkpoints.len(), 1);
        assert_eq!(manifest.checkpoints[0], "phase5_finalization");
    }
}
