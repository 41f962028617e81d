//! External program execution.
//!
//! On timeout only the direct child is killed (`kill_on_drop`). Processes it
//! forked, e.g. the solver behind a wrapper script, are not in its kill set
//! and may keep running; such a straggler can still write the result
//! document after the orchestrator's post-timeout reset. Point `program` at
//! the solver itself, or have the wrapper `exec` it, when using a timeout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::InvocationFailure;
use crate::invocation::InvocationSpec;

/// Outcome of one child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionRecord {
    /// Whether the program exited with status 0.
    ///
    /// Informational only; the comparator decides pass/fail.
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == 0
    }
}

/// Seam between orchestration and process spawning.
#[async_trait]
pub trait ProgramExecutor: Send + Sync {
    /// Run the program described by `spec` to completion.
    async fn execute(&self, spec: &InvocationSpec) -> Result<ExecutionRecord, InvocationFailure>;
}

/// Spawns the program as a child process in the spec's working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl ProgramExecutor for ProcessExecutor {
    async fn execute(&self, spec: &InvocationSpec) -> Result<ExecutionRecord, InvocationFailure> {
        let start = Instant::now();
        let argv = spec.command_line();
        let program = argv
            .first()
            .filter(|p| !p.is_empty())
            .ok_or(InvocationFailure::EmptyProgram)?
            .clone();

        let child = Command::new(&program)
            .args(&argv[1..])
            .current_dir(spec.working_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvocationFailure::Spawn {
                program: program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = if spec.timeout_secs() > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs()),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| InvocationFailure::TimedOut {
                program: program.clone(),
                timeout_secs: spec.timeout_secs(),
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|source| InvocationFailure::Wait {
            program: program.clone(),
            source,
        })?;

        Ok(ExecutionRecord {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
