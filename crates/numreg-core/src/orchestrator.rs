//! Run orchestration: clear the stale artifact, run the program, hand back
//! the path of the result document.
//!
//! The orchestrator never opens the result document. A failing or crashing
//! program is recorded and logged, and the comparator then decides the
//! variant's fate from whatever document is (or is not) on disk.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::InvocationFailure;
use crate::invocation::InvocationSpec;
use crate::runner::{ExecutionRecord, ProgramExecutor};

/// Bytes of captured output kept in log lines.
const LOG_TAIL_BYTES: usize = 2048;

/// What [`reset_artifact`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactReset {
    Removed,
    Absent,
}

/// Delete `path` if it exists. Absence is success; any other error is returned.
pub fn reset_artifact(path: &Path) -> io::Result<ArtifactReset> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(ArtifactReset::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ArtifactReset::Absent),
        Err(e) => Err(e),
    }
}

/// Record of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Where the result document is expected.
    pub output_path: PathBuf,

    /// Rendered command line, for operators.
    pub command: String,

    /// Digest of the invocation.
    pub invocation_digest: String,

    /// Child process record, when the program ran to completion.
    pub execution: Option<ExecutionRecord>,

    /// Invocation failure message, if any.
    pub failure: Option<String>,

    /// False when a stale artifact could not be cleared, so whatever sits at
    /// `output_path` may predate this run.
    pub artifact_fresh: bool,
}

/// Runs one [`InvocationSpec`] through a [`ProgramExecutor`].
pub struct RunOrchestrator<E> {
    executor: E,
}

impl<E: ProgramExecutor> RunOrchestrator<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// Execute `spec` and return the path the result document should be at.
    pub async fn run(&self, spec: &InvocationSpec) -> RunOutcome {
        let output_path = spec.output_path();
        let mut outcome = RunOutcome {
            output_path: output_path.clone(),
            command: spec.to_string(),
            invocation_digest: spec.digest(),
            execution: None,
            failure: None,
            artifact_fresh: true,
        };

        match reset_artifact(&output_path) {
            Ok(ArtifactReset::Removed) => {
                debug!(path = %output_path.display(), "Removed stale artifact");
            }
            Ok(ArtifactReset::Absent) => {}
            Err(source) => {
                let failure = InvocationFailure::ArtifactReset {
                    path: output_path.clone(),
                    source,
                };
                warn!(error = %failure, "Skipping program run");
                outcome.failure = Some(failure.to_string());
                outcome.artifact_fresh = false;
                return outcome;
            }
        }

        info!(command = %outcome.command, "Executing");

        match self.executor.execute(spec).await {
            Ok(record) => {
                if !record.exited_cleanly() {
                    warn!(exit_code = record.exit_code, "Program exited with non-zero status");
                }
                debug!(stdout = %tail(&record.stdout), "Program stdout");
                debug!(stderr = %tail(&record.stderr), "Program stderr");
                info!(
                    exit_code = record.exit_code,
                    duration_ms = record.duration_ms,
                    "Finished run"
                );
                outcome.execution = Some(record);
            }
            Err(failure) => {
                warn!(error = %failure, "Invocation failed");
                if matches!(failure, InvocationFailure::TimedOut { .. }) {
                    // A killed run may leave a partial document behind.
                    if let Err(source) = reset_artifact(&output_path) {
                        warn!(
                            path = %output_path.display(),
                            error = %source,
                            "Cannot remove artifact of timed-out run"
                        );
                        outcome.artifact_fresh = false;
                    }
                }
                outcome.failure = Some(failure.to_string());
            }
        }

        outcome
    }
}

fn tail(text: &str) -> &str {
    if text.len() <= LOG_TAIL_BYTES {
        return text;
    }
    let mut start = text.len() - LOG_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
