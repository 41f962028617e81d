//! In-process fakes for the program executor (testing only)
//!
//! `ScriptedExecutor` satisfies the `ProgramExecutor` contract without
//! spawning anything: per output prefix it writes a canned result document,
//! reports a chosen exit code, or fails the way a real invocation can.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::InvocationFailure;
use crate::invocation::InvocationSpec;
use crate::runner::{ExecutionRecord, ProgramExecutor};

#[derive(Debug, Clone)]
enum Script {
    Document(String),
    SpawnFailure,
    Timeout,
}

/// Executor that writes canned documents keyed by output prefix.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    exit_codes: HashMap<String, i32>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `document` as the result for `prefix`.
    pub fn with_document(self, prefix: &str, document: Value) -> Self {
        self.with_raw_document(prefix, &document.to_string())
    }

    /// Write `text` verbatim as the result for `prefix`.
    pub fn with_raw_document(mut self, prefix: &str, text: &str) -> Self {
        self.scripts
            .insert(prefix.to_string(), Script::Document(text.to_string()));
        self
    }

    pub fn with_exit_code(mut self, prefix: &str, exit_code: i32) -> Self {
        self.exit_codes.insert(prefix.to_string(), exit_code);
        self
    }

    pub fn with_spawn_failure(mut self, prefix: &str) -> Self {
        self.scripts.insert(prefix.to_string(), Script::SpawnFailure);
        self
    }

    pub fn with_timeout(mut self, prefix: &str) -> Self {
        self.scripts.insert(prefix.to_string(), Script::Timeout);
        self
    }

    /// Command lines seen so far, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgramExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &InvocationSpec) -> Result<ExecutionRecord, InvocationFailure> {
        self.calls.lock().unwrap().push(spec.command_line());
        let program = spec.program().display().to_string();

        match self.scripts.get(spec.output_prefix()) {
            Some(Script::SpawnFailure) => {
                return Err(InvocationFailure::Spawn {
                    program,
                    source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
                })
            }
            Some(Script::Timeout) => {
                return Err(InvocationFailure::TimedOut {
                    program,
                    timeout_secs: spec.timeout_secs(),
                })
            }
            Some(Script::Document(text)) => {
                std::fs::write(spec.output_path(), text).map_err(|source| {
                    InvocationFailure::Wait {
                        program: program.clone(),
                        source,
                    }
                })?;
            }
            None => {}
        }

        Ok(ExecutionRecord {
            exit_code: self
                .exit_codes
                .get(spec.output_prefix())
                .copied()
                .unwrap_or(0),
            stdout: format!("scripted run of {}\n", spec.output_prefix()),
            stderr: String::new(),
            duration_ms: 0,
        })
    }
}
