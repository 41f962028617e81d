//! Test aggregation across variants.
//!
//! State machine per suite:
//!
//! ```text
//! Pending(i) -> Ran(i) -> Compared(i) -> Pending(i + 1) ... -> Finalized
//! ```
//!
//! Every variant is run and compared even after an earlier one failed; the
//! aggregate verdict is only updated on the `Ran -> Compared` transition.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::compare::{compare, Comparison};
use crate::orchestrator::{RunOrchestrator, RunOutcome};
use crate::runner::ProgramExecutor;
use crate::suite::SuiteConfig;

/// Process exit status when every variant passes.
pub const EXIT_SUCCESS: i32 = 0;

/// Process exit status when at least one variant fails.
pub const EXIT_FAILURE: i32 = 1;

/// Position of a [`TestAggregator`] in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "variant", rename_all = "snake_case")]
pub enum AggregatorState {
    Pending(usize),
    Ran(usize),
    Compared(usize),
    Finalized,
}

/// Everything observed for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOutcome {
    pub variant: String,
    pub reference_path: std::path::PathBuf,
    pub run: RunOutcome,
    /// Present when both documents loaded.
    pub comparison: Option<Comparison>,
    /// Document load failure, when the comparison could not start.
    pub load_error: Option<String>,
    pub passed: bool,
}

/// Verdict over a whole suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallResult {
    pub run_id: Uuid,
    pub suite: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub variants: Vec<VariantOutcome>,
    pub success: bool,
}

impl OverallResult {
    pub fn exit_code(&self) -> i32 {
        if self.success {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }

    pub fn passed_count(&self) -> usize {
        self.variants.iter().filter(|v| v.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.variants.iter().filter(|v| !v.passed).count()
    }
}

/// Runs orchestrator and comparator once per variant and folds the results.
pub struct TestAggregator<E> {
    suite: SuiteConfig,
    orchestrator: RunOrchestrator<E>,
    state: AggregatorState,
    aggregate: bool,
    last_run: Option<RunOutcome>,
    outcomes: Vec<VariantOutcome>,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl<E: ProgramExecutor> TestAggregator<E> {
    pub fn new(suite: SuiteConfig, executor: E) -> Self {
        let state = if suite.variants.is_empty() {
            AggregatorState::Finalized
        } else {
            AggregatorState::Pending(0)
        };
        Self {
            suite,
            orchestrator: RunOrchestrator::new(executor),
            state,
            aggregate: true,
            last_run: None,
            outcomes: Vec::new(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Running conjunction of all variants compared so far.
    pub fn aggregate(&self) -> bool {
        self.aggregate
    }

    pub fn suite(&self) -> &SuiteConfig {
        &self.suite
    }

    pub fn outcomes(&self) -> &[VariantOutcome] {
        &self.outcomes
    }

    /// Perform one transition and return the new state.
    pub async fn step(&mut self) -> AggregatorState {
        self.state = match self.state {
            AggregatorState::Pending(i) => {
                let variant = &self.suite.variants[i];
                let spec = self.suite.invocation_for(variant);
                let span = info_span!("variant", variant = %variant.name);
                info!(parent: &span, index = i + 1, total = self.suite.variants.len(), "Running variant");
                self.last_run = Some(self.orchestrator.run(&spec).instrument(span).await);
                AggregatorState::Ran(i)
            }
            AggregatorState::Ran(i) => {
                let outcome = self.compare_variant(i);
                self.aggregate = self.aggregate && outcome.passed;
                self.outcomes.push(outcome);
                AggregatorState::Compared(i)
            }
            AggregatorState::Compared(i) if i + 1 < self.suite.variants.len() => {
                AggregatorState::Pending(i + 1)
            }
            AggregatorState::Compared(_) | AggregatorState::Finalized => {
                AggregatorState::Finalized
            }
        };
        self.state
    }

    /// Drive every variant to completion.
    pub async fn run(mut self) -> OverallResult {
        info!(
            run_id = %self.run_id,
            suite = %self.suite.name,
            variants = self.suite.variants.len(),
            "Starting suite"
        );
        while self.step().await != AggregatorState::Finalized {}
        self.finish()
    }

    fn compare_variant(&mut self, i: usize) -> VariantOutcome {
        let variant = &self.suite.variants[i];
        let _guard = info_span!("variant", variant = %variant.name).entered();
        let reference_path = self.suite.reference_path_for(variant);
        let run = match self.last_run.take() {
            Some(run) => run,
            // Only reachable if step() is bypassed; compare against the
            // configured path as if the run left nothing behind.
            None => RunOutcome {
                output_path: self.suite.invocation_for(variant).output_path(),
                command: String::new(),
                invocation_digest: String::new(),
                execution: None,
                failure: Some("variant was not run".to_string()),
                artifact_fresh: false,
            },
        };

        let (comparison, load_error) = match compare(
            &run.output_path,
            &reference_path,
            &self.suite.fields,
            self.suite.tolerance,
        ) {
            Ok(comparison) => (Some(comparison), None),
            Err(e) => {
                warn!(error = %e, "Comparison could not start");
                (None, Some(e.to_string()))
            }
        };

        if !run.artifact_fresh {
            warn!(path = %run.output_path.display(), "Result document may predate this run");
        }
        let passed = run.artifact_fresh && comparison.as_ref().is_some_and(|c| c.passed);
        if passed {
            info!("Variant passed");
        } else {
            warn!("Variant failed");
        }

        VariantOutcome {
            variant: variant.name.clone(),
            reference_path,
            run,
            comparison,
            load_error,
            passed,
        }
    }

    /// Close the run and build the overall verdict.
    ///
    /// Called by [`TestAggregator::run`]; callers stepping the aggregator
    /// themselves call it once [`AggregatorState::Finalized`] is reached.
    pub fn finish(self) -> OverallResult {
        let result = OverallResult {
            run_id: self.run_id,
            suite: self.suite.name,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.clock.elapsed().as_millis() as u64,
            variants: self.outcomes,
            success: self.aggregate,
        };
        if result.success {
            info!(run_id = %result.run_id, "Suite passed");
        } else {
            warn!(
                run_id = %result.run_id,
                failed = result.failed_count(),
                "Suite failed"
            );
        }
        result
    }
}
