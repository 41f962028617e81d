//! numreg - numerical regression harness
//!
//! Runs an external computation once per configured variant, then checks
//! selected fields of its JSON result document against a reference document
//! within an absolute tolerance:
//! - `invocation` builds the command line and the `key=value; ...` parameter string
//! - `orchestrator` clears stale artifacts and runs the program
//! - `compare` judges fields and produces per-field verdicts
//! - `aggregator` runs every variant and folds the verdicts into one result

pub mod aggregator;
pub mod compare;
pub mod error;
pub mod fakes;
pub mod invocation;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod suite;
pub mod telemetry;

pub use aggregator::{
    AggregatorState, OverallResult, TestAggregator, VariantOutcome, EXIT_FAILURE, EXIT_SUCCESS,
};
pub use compare::{
    compare, compare_documents, evaluate_field, load_document, lookup_field, Comparison,
    ComparisonField, DocumentSide, Tolerance, Verdict, VerdictFailure,
};
pub use error::{DocumentLoadError, HarnessError, InvocationFailure, Result};
pub use invocation::{
    escape_value, validate_separator, InvocationSpec, Parameter, ParameterList,
};
pub use orchestrator::{reset_artifact, ArtifactReset, RunOrchestrator, RunOutcome};
pub use report::{read_report, render_summary, render_totals, render_variant, write_report};
pub use runner::{ExecutionRecord, ProcessExecutor, ProgramExecutor};
pub use suite::{SuiteConfig, VariantConfig};
pub use telemetry::init_tracing;
