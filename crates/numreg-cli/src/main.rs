//! numreg - numerical regression harness CLI
//!
//! ## Commands
//!
//! - `run`: run every variant of a suite and compare against references
//! - `compare`: compare one result document against one reference document
//! - `report`: print a stored suite report

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use numreg_core::{
    compare, read_report, render_summary, render_totals, render_variant, write_report,
    AggregatorState, ComparisonField, OverallResult, ProcessExecutor, ProgramExecutor,
    SuiteConfig, TestAggregator, Tolerance, EXIT_FAILURE, EXIT_SUCCESS,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "numreg")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Numerical regression harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every variant of a suite and compare results against references
    Run {
        /// Suite file (JSON)
        #[arg(short, long, env = "NUMREG_SUITE")]
        suite: PathBuf,

        /// Only run the named variants (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,

        /// Run directory, overriding the suite's working_dir
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Directory to store the JSON report in
        #[arg(long, env = "NUMREG_REPORT_DIR")]
        report_dir: Option<PathBuf>,
    },

    /// Compare a result document against a reference document
    Compare {
        /// Result document produced by the program
        #[arg(long)]
        actual: PathBuf,

        /// Reference document
        #[arg(long)]
        reference: PathBuf,

        /// Field to compare (repeatable; dotted paths allowed)
        #[arg(short, long = "field", required = true)]
        fields: Vec<String>,

        /// Absolute tolerance for numeric fields
        #[arg(short, long, default_value = "1e-4")]
        tolerance: f64,
    },

    /// Print a stored suite report
    Report {
        /// Run ID of the report
        #[arg(long)]
        run: String,

        /// Directory holding reports
        #[arg(long, env = "NUMREG_REPORT_DIR", default_value = ".numreg/reports")]
        report_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    numreg_core::init_tracing(cli.json, level);

    let status = match cli.command {
        Commands::Run {
            suite,
            only,
            work_dir,
            report_dir,
        } => cmd_run(&suite, &only, work_dir.as_deref(), report_dir.as_deref()).await?,
        Commands::Compare {
            actual,
            reference,
            fields,
            tolerance,
        } => cmd_compare(&actual, &reference, &fields, tolerance)?,
        Commands::Report { run, report_dir } => cmd_report(&run, &report_dir)?,
    };

    Ok(ExitCode::from(status as u8))
}

/// Run a suite and return the process exit status.
async fn cmd_run(
    suite_path: &Path,
    only: &[String],
    work_dir: Option<&Path>,
    report_dir: Option<&Path>,
) -> Result<i32> {
    let mut suite = SuiteConfig::from_path(suite_path)
        .with_context(|| format!("Failed to load suite {}", suite_path.display()))?
        .select(only)?;

    if let Some(dir) = work_dir {
        suite.working_dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };
    }

    println!("Testing {}/{}", suite.program.display(), suite.name);
    println!(
        " reference files found in directory: {}",
        suite.reference_dir.display()
    );
    println!();

    let aggregator = TestAggregator::new(suite, ProcessExecutor);
    let result = run_with_progress(aggregator, &mut std::io::stdout()).await?;

    if let Some(dir) = report_dir {
        let path = write_report(&result, dir).context("Failed to write report")?;
        info!(path = %path.display(), "Wrote report");
        println!("Report: {}", path.display());
    }

    Ok(result.exit_code())
}

/// Step `aggregator` to completion, writing each variant's command before it
/// runs and its verdict block as soon as it has been compared.
async fn run_with_progress<E: ProgramExecutor>(
    mut aggregator: TestAggregator<E>,
    out: &mut impl Write,
) -> Result<OverallResult> {
    loop {
        match aggregator.state() {
            AggregatorState::Pending(i) => {
                let suite = aggregator.suite();
                writeln!(
                    out,
                    "executing \n  {}",
                    suite.invocation_for(&suite.variants[i])
                )?;
                out.flush()?;
            }
            AggregatorState::Finalized => break,
            AggregatorState::Ran(_) | AggregatorState::Compared(_) => {}
        }

        if let AggregatorState::Compared(_) = aggregator.step().await {
            if let Some(outcome) = aggregator.outcomes().last() {
                writeln!(out, "{}", render_variant(outcome))?;
                out.flush()?;
            }
        }
    }

    let result = aggregator.finish();
    write!(out, "{}", render_totals(&result))?;
    Ok(result)
}

/// Compare two documents and return the process exit status.
fn cmd_compare(actual: &Path, reference: &Path, fields: &[String], tolerance: f64) -> Result<i32> {
    let tolerance = Tolerance::absolute(tolerance).map_err(anyhow::Error::msg)?;
    let fields: Vec<ComparisonField> = fields.iter().map(ComparisonField::new).collect();

    let comparison = match compare(actual, reference, &fields, tolerance) {
        Ok(comparison) => comparison,
        Err(e) => {
            println!("✗ {}", e);
            return Ok(EXIT_FAILURE);
        }
    };

    for verdict in &comparison.verdicts {
        let mark = if verdict.within_tolerance { "✓" } else { "✗" };
        println!("  {} {}", mark, verdict.detail);
    }
    println!("final success: {}", comparison.passed);

    Ok(if comparison.passed {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

/// Print a stored report and return its exit status.
fn cmd_report(run_id: &str, report_dir: &Path) -> Result<i32> {
    let result = read_report(run_id, report_dir)
        .with_context(|| format!("Failed to read report {}", run_id))?;

    println!("Run ID: {}", result.run_id);
    println!("Suite: {}", result.suite);
    println!("Started: {}", result.started_at.to_rfc3339());
    println!();
    print!("{}", render_summary(&result));

    Ok(result.exit_code())
}
