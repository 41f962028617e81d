//! Error taxonomy for the regression harness.

use std::path::PathBuf;

/// A result or reference document could not be loaded.
///
/// Fatal for the comparison of one variant, never for the whole suite.
#[derive(Debug, thiserror::Error)]
pub enum DocumentLoadError {
    #[error("cannot read document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document {path} is not well-formed JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("document {path} is not a JSON object")]
    NotAMapping { path: PathBuf },
}

impl DocumentLoadError {
    /// Path of the document that failed to load.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } | Self::NotAMapping { path } => path,
        }
    }
}

/// The external program could not be run to completion, or its stale
/// artifact could not be cleared.
///
/// Logged and recorded; the variant still proceeds to comparison.
#[derive(Debug, thiserror::Error)]
pub enum InvocationFailure {
    #[error("invocation has an empty program path")]
    EmptyProgram,

    #[error("cannot remove stale artifact {path}: {source}")]
    ArtifactReset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout_secs} seconds")]
    TimedOut { program: String, timeout_secs: u64 },
}

/// Crate-level errors.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("invalid suite configuration: {0}")]
    InvalidConfig(String),

    #[error("document load error: {0}")]
    DocumentLoad(#[from] DocumentLoadError),

    #[error("invocation failure: {0}")]
    Invocation(#[from] InvocationFailure),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
