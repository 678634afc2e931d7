//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.
//!
//! The console children (`listen`, `boot`, `remote-hw`) run their console dialogue on a current-thread tokio
//! runtime and turn its outcome into their exit status; that status is what the coordinator polls. The
//! coordinator stops the ones still running with SIGTERM, which drops the dialogue and with it the console
//! session.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use hvharness_core::TargetKind;
use tokio::signal::unix::{SignalKind, signal};

use crate::behavior::{Behavior, BehaviorRegistry, NoopBehavior};
use crate::boot::{BootSupervisor, HardwareHandshake};
use crate::config::HarnessConfig;
use crate::coordinator::{RunCoordinator, RunError, TestSpec};
use crate::events::{self, ExecutionStats};
use crate::ledger::Ledger;
use crate::listener::{self, ListenerKind, ListenerTimeouts};
use crate::process::{OsLauncher, SelfInvocation};
use crate::remote::{RemoteOutcome, RemoteSession};
use crate::report::ResultTable;

use super::{CliError, CliResult, ExitCode};

/// Exit status of `remote-hw` when the session hit its overall timeout.
const REMOTE_TIMEOUT_EXIT: i32 = 2;

/// Exit status of a console child stopped by SIGTERM (128 + 15, as a shell reports it).
pub const TERMINATED_EXIT: i32 = 143;

// ============================================================================
// Shared setup
// ============================================================================

/// Load configuration, rendering file errors as diagnostics.
pub fn load_config(path: Option<&Path>) -> CliResult<HarnessConfig> {
    HarnessConfig::load(path).map_err(CliError::diagnostic)
}

/// Coordinator starting real processes, with children invoking this executable.
pub fn os_coordinator(config: HarnessConfig, config_path: Option<PathBuf>) -> CliResult<RunCoordinator<OsLauncher>> {
    let harness = SelfInvocation::current(config_path)
        .map_err(|e| CliError::failure(format!("Error locating the hvharness executable: {e}")))?;
    Ok(RunCoordinator::new(config, harness, OsLauncher))
}

/// Behavior lookup rooted at the configured test directory.
pub fn behavior_registry(config: &HarnessConfig) -> BehaviorRegistry {
    BehaviorRegistry::new(&config.paths.test_root)
}

fn block_on<F: Future>(future: F) -> CliResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::failure(format!("Error starting async runtime: {e}")))?;
    Ok(runtime.block_on(future))
}

/// Run a console child's dialogue until it ends or SIGTERM arrives. `None` means terminated.
fn run_console_child<F: Future>(dialogue: F) -> CliResult<Option<F::Output>> {
    let outcome = block_on(async {
        let mut terminate = signal(SignalKind::terminate())?;
        let output = tokio::select! {
            output = dialogue => Some(output),
            _ = terminate.recv() => None,
        };
        Ok::<_, io::Error>(output)
    })?;
    outcome.map_err(|e| CliError::failure(format!("Error installing SIGTERM handler: {e}")))
}

pub(crate) fn run_error(error: RunError) -> CliError {
    CliError::failure(format!("Error: {error}"))
}

// ============================================================================
// run / report / stats
// ============================================================================

/// Run one test and append its row to `results_file`.
///
/// Succeeds whenever the row was written; the test outcome is in the row.
pub fn run_test(
    config: HarnessConfig,
    config_path: Option<PathBuf>,
    spec: &TestSpec,
    results_file: &Path,
) -> CliResult<ExitCode> {
    // Reject bad arguments before touching the ledger or starting anything.
    spec.validate().map_err(run_error)?;

    let ledger = Ledger::open_append(results_file).map_err(|e| CliError::failure(format!("Error: {e}")))?;
    let mut coordinator = os_coordinator(config, config_path)?;
    let result = coordinator.run(spec, &ledger).map_err(run_error)?;
    println!("{} {}", result.test_name, result.verdict);
    Ok(ExitCode::SUCCESS)
}

/// Print the cross-target result table.
pub fn report(dir: &Path, json: bool) -> CliResult<ExitCode> {
    let table = ResultTable::load(dir).map_err(|e| CliError::failure(format!("Error: {e}")))?;
    if json {
        let text = table.to_json().map_err(|e| CliError::failure(format!("Error: {e}")))?;
        println!("{text}");
    } else {
        print!("{}", table.render_text());
    }
    Ok(ExitCode::SUCCESS)
}

/// Print execution statistics of an event feed.
pub fn stats(feed: &Path) -> CliResult<ExitCode> {
    let events = events::read_feed(feed).map_err(|e| CliError::failure(format!("Error: {e}")))?;
    let stats = ExecutionStats::from_events(&events);
    print!("{}", stats.render());
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Console children
// ============================================================================

/// Watch a secondary console. The exit code is the listener outcome.
pub fn listen(
    config: &HarnessConfig,
    command: &str,
    log: &Path,
    linux: bool,
    test_name: Option<&str>,
    full_name: Option<&str>,
) -> CliResult<ExitCode> {
    let kind = ListenerKind::for_test(linux);
    let mut behavior: Box<dyn Behavior> = match (kind, test_name) {
        (ListenerKind::Linux, Some(name)) => behavior_registry(config).resolve(name, full_name.unwrap_or(name)),
        _ => Box::new(NoopBehavior),
    };
    let timeouts = ListenerTimeouts::default();
    let Some(outcome) = run_console_child(listener::listen(command, log, kind, &timeouts, behavior.as_mut()))? else {
        tracing::info!(log = %log.display(), "listener terminated");
        return Ok(ExitCode(TERMINATED_EXIT));
    };
    tracing::info!(?outcome, log = %log.display(), "listener finished");
    Ok(ExitCode(outcome.exit_code()))
}

/// Supervise console 0 until its stream fails.
pub fn boot(
    config: &HarnessConfig,
    command: &str,
    log: &Path,
    test_name: &str,
    full_name: &str,
    target_type: TargetKind,
) -> CliResult<ExitCode> {
    let supervisor = match target_type {
        TargetKind::Simulated => BootSupervisor::simulated(),
        TargetKind::Hardware => BootSupervisor::hardware(HardwareHandshake::new(&config.remote, test_name, full_name)),
    };
    let mut behavior = behavior_registry(config).resolve(test_name, full_name);
    let Some(outcome) = run_console_child(supervisor.run(command, log, behavior.as_mut()))? else {
        tracing::info!(log = %log.display(), "boot console terminated");
        return Ok(ExitCode(TERMINATED_EXIT));
    };
    tracing::info!(?outcome, log = %log.display(), "boot console finished");
    Ok(ExitCode(outcome.exit_code()))
}

/// Log in to the console server and run the mux there, streaming the session to stdout.
pub fn remote_hw(config: &HarnessConfig, mux_command: &str) -> CliResult<ExitCode> {
    let session = RemoteSession::for_mux(&config.remote, mux_command);
    let Some(result) = run_console_child(session.run(Box::new(tokio::io::stdout())))? else {
        tracing::info!("remote session terminated");
        return Ok(ExitCode(TERMINATED_EXIT));
    };
    let outcome = result.map_err(|e| CliError::failure(format!("Error: remote session failed: {e}")))?;
    Ok(match outcome {
        RemoteOutcome::Closed | RemoteOutcome::Interrupted => ExitCode::SUCCESS,
        RemoteOutcome::TimedOut => ExitCode(REMOTE_TIMEOUT_EXIT),
    })
}
