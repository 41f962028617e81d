//! Suite report artifacts.
//!
//! - `render_summary` - operator-facing text, one block per variant
//!   (`render_variant`) followed by the totals (`render_totals`)
//! - `write_report` / `read_report` - `<dir>/<run_id>/report.json` plus a
//!   SHA-256 sidecar `report.digest` checked on read

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::aggregator::{OverallResult, VariantOutcome};
use crate::error::{HarnessError, Result};

const REPORT_FILE: &str = "report.json";
const DIGEST_FILE: &str = "report.digest";

/// Human-readable summary of a suite run.
pub fn render_summary(result: &OverallResult) -> String {
    let mut out: String = result.variants.iter().map(render_variant).collect();
    out.push_str(&render_totals(result));
    out
}

/// Text block for one variant: command, run status, then one line per field.
pub fn render_variant(outcome: &VariantOutcome) -> String {
    let mut out = String::new();
    let mark = if outcome.passed { "✓" } else { "✗" };
    out.push_str(&format!("{} {}\n", mark, outcome.variant));
    out.push_str(&format!("    command: {}\n", outcome.run.command));
    if let Some(execution) = &outcome.run.execution {
        out.push_str(&format!(
            "    exit code: {} ({}ms)\n",
            execution.exit_code, execution.duration_ms
        ));
    }
    if let Some(failure) = &outcome.run.failure {
        out.push_str(&format!("    invocation: {}\n", failure));
    }
    if let Some(error) = &outcome.load_error {
        out.push_str(&format!("    load error: {}\n", error));
    }
    if let Some(comparison) = &outcome.comparison {
        for verdict in &comparison.verdicts {
            out.push_str(&format!("    {}\n", verdict.detail));
        }
    }
    out
}

/// Closing lines: pass count and the final verdict.
pub fn render_totals(result: &OverallResult) -> String {
    format!(
        "\nSummary: {}/{} variants passed ({}ms)\nfinal success: {}\n",
        result.passed_count(),
        result.variants.len(),
        result.duration_ms,
        result.success
    )
}

/// Persist `result` under `<dir>/<run_id>/` and return the report path.
pub fn write_report(result: &OverallResult, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(result.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let path = run_dir.join(REPORT_FILE);
    let json = serde_json::to_vec_pretty(result)?;
    std::fs::write(&path, &json)?;
    std::fs::write(run_dir.join(DIGEST_FILE), digest(&json).as_bytes())?;

    Ok(path)
}

/// Read `<dir>/<run_id>/report.json`, verifying it against its digest.
pub fn read_report(run_id: &str, dir: &Path) -> Result<OverallResult> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join(REPORT_FILE))?;
    let expected = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;

    let actual = digest(&json);
    if expected.trim() != actual {
        return Err(HarnessError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
