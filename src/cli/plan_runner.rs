//! Test plan execution
//!
//! ## PlanReporter Trait
//!
//! Progress output goes through a `PlanReporter` so that plan execution can be driven (and observed) without a
//! terminal. `ConsoleReporter` prints the campaign log format:
//!
//! ```text
//! ===Test 1===
//! hcalls - none : enabled
//! hcalls PASSED in 00:01:12
//! ```
//!
//! ## Ledger handling
//!
//! A fresh campaign wipes the target's log directory and starts a new `<target>_results.txt`. With
//! `--no-cleanup` both are kept and rows are appended.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use hvharness_core::Verdict;

use crate::config::HarnessConfig;
use crate::coordinator::RunCoordinator;
use crate::ledger::{self, Ledger, LedgerError};
use crate::plan::{self, PlanEntry};
use crate::process::ProcessLauncher;

use super::commands;
use super::{CliError, CliResult, ExitCode};

// ============================================================================
// Plan Reporter Trait
// ============================================================================

/// Trait for reporting plan progress.
pub trait PlanReporter {
    /// Called once the plan file is parsed
    fn on_plan_loaded(&mut self, _entries: usize) {}

    /// Called before an entry is run or skipped; `number` is 1-based
    fn on_test_start(&mut self, number: usize, entry: &PlanEntry);

    /// Called after an entry is done
    fn on_test_complete(&mut self, entry: &PlanEntry, outcome: &EntryOutcome);

    /// Called when every entry has been handled
    fn on_plan_complete(&mut self, summary: &PlanSummary);
}

/// What happened to one plan entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The run completed and its row was written.
    Ran { verdict: Verdict, duration: Duration },
    /// The run could not be carried out; no row was written.
    Errored { message: String, duration: Duration },
    /// Disabled entry; a `NOT_EXECUTED` row was written.
    NotExecuted,
}

/// Summary of a plan run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub not_executed: usize,
    pub errored: usize,
    pub duration: Duration,
}

impl PlanSummary {
    fn record(&mut self, outcome: &EntryOutcome) {
        self.total += 1;
        match outcome {
            EntryOutcome::Ran { verdict, .. } => match verdict {
                Verdict::Passed => self.passed += 1,
                Verdict::Failed => self.failed += 1,
                Verdict::Warning => self.warnings += 1,
                Verdict::NotExecuted => self.not_executed += 1,
            },
            EntryOutcome::Errored { .. } => self.errored += 1,
            EntryOutcome::NotExecuted => self.not_executed += 1,
        }
    }
}

/// `HH:MM:SS`, hours not wrapped.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Default console reporter
#[derive(Default)]
pub struct ConsoleReporter;

impl PlanReporter for ConsoleReporter {
    fn on_plan_loaded(&mut self, entries: usize) {
        if entries == 0 {
            eprintln!("No tests in plan");
        }
    }

    fn on_test_start(&mut self, number: usize, entry: &PlanEntry) {
        println!("===Test {number}===");
        println!("{} - {} : {}", entry.name, entry.subtest, entry.state());
    }

    fn on_test_complete(&mut self, entry: &PlanEntry, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Ran { verdict, duration } => {
                println!("{} {} in {}", entry.full_name(), verdict, format_duration(*duration));
            }
            EntryOutcome::Errored { message, duration } => {
                eprintln!("{} errored after {}: {}", entry.full_name(), format_duration(*duration), message);
            }
            EntryOutcome::NotExecuted => {}
        }
    }

    fn on_plan_complete(&mut self, summary: &PlanSummary) {
        println!();
        println!(
            "{} test(s): {} passed, {} failed, {} warning, {} not executed, {} errored",
            summary.total, summary.passed, summary.failed, summary.warnings, summary.not_executed, summary.errored
        );
        println!("Total time {}", format_duration(summary.duration));
    }
}

// ============================================================================
// Plan execution
// ============================================================================

/// Prepare the target's log directory and ledger.
pub fn prepare_campaign(config: &HarnessConfig, target: &str, cleanup: bool) -> CliResult<Ledger> {
    let path = ledger::ledger_path(&config.paths.results_dir, target);
    if !cleanup {
        return Ledger::open_append(path).map_err(|e| CliError::failure(format!("Error: {e}")));
    }

    let log_dir = config.log_dir(target);
    match std::fs::remove_dir_all(&log_dir) {
        Ok(()) => tracing::info!(dir = %log_dir.display(), "removed old logs"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(CliError::failure(format!(
                "Error removing log directory {}: {e}",
                log_dir.display()
            )));
        }
    }
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| CliError::failure(format!("Error creating log directory {}: {e}", log_dir.display())))?;
    Ledger::create(path).map_err(|e| CliError::failure(format!("Error: {e}")))
}

/// Run every entry of a plan in order.
///
/// A failing run never stops the plan; only a ledger that cannot be written does.
pub fn execute_plan<L: ProcessLauncher>(
    coordinator: &mut RunCoordinator<L>,
    entries: &[PlanEntry],
    target: &str,
    ledger: &Ledger,
    reporter: &mut dyn PlanReporter,
) -> Result<PlanSummary, LedgerError> {
    let started = Instant::now();
    let gap = coordinator.config().timing.plan_gap();
    let mut summary = PlanSummary::default();
    reporter.on_plan_loaded(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        reporter.on_test_start(i + 1, entry);
        let outcome = if entry.enabled {
            let test_started = Instant::now();
            let outcome = match coordinator.run(&entry.to_spec(target), ledger) {
                Ok(result) => EntryOutcome::Ran {
                    verdict: result.verdict,
                    duration: test_started.elapsed(),
                },
                Err(crate::coordinator::RunError::Ledger(e)) => return Err(e),
                Err(e) => {
                    tracing::error!(test = %entry.full_name(), line = entry.line, error = %e, "run failed");
                    EntryOutcome::Errored {
                        message: e.to_string(),
                        duration: test_started.elapsed(),
                    }
                }
            };
            thread::sleep(gap);
            outcome
        } else {
            ledger.append_not_executed(&entry.full_name())?;
            EntryOutcome::NotExecuted
        };
        reporter.on_test_complete(entry, &outcome);
        summary.record(&outcome);
    }

    summary.duration = started.elapsed();
    reporter.on_plan_complete(&summary);
    Ok(summary)
}

/// `hvharness plan`: parse the plan, prepare the campaign and run it.
pub fn run_plan(
    config: HarnessConfig,
    config_path: Option<PathBuf>,
    plan_file: &Path,
    target: &str,
    cleanup: bool,
) -> CliResult<ExitCode> {
    let entries = plan::read_plan(plan_file).map_err(CliError::diagnostic)?;
    let ledger = prepare_campaign(&config, target, cleanup)?;
    tracing::info!(plan = %plan_file.display(), target, tests = entries.len(), ledger = %ledger.path().display(), "running plan");

    let mut coordinator = commands::os_coordinator(config, config_path)?;
    let mut reporter = ConsoleReporter;
    execute_plan(&mut coordinator, &entries, target, &ledger, &mut reporter)
        .map_err(|e| CliError::failure(format!("Error: {e}")))?;
    Ok(ExitCode::SUCCESS)
}
