//! CLI module for the hypervisor test harness
//!
//! ## Commands
//!
//! - `run <test> <subtest|none> <consoles> <required> <target> <results>` - Run one test and append its row
//! - `plan <plan_file> <target>` - Run every entry of a test plan
//! - `report [dir]` - Merge per-target ledgers into one table
//! - `stats <feed>` - Summarize a simulator event feed
//!
//! Started by the coordinator as child processes, one per console or remote session:
//!
//! - `listen <command> <log>` - Watch a secondary console until it completes
//! - `boot <command> <log>` - Supervise console 0 (boot handshake, handoff behavior)
//! - `remote-hw <mux_cmd>` - Log in to the console server and start the mux there
//!
//! ## Modules
//!
//! - `commands` - Command implementations
//! - `plan_runner` - Test plan execution and progress reporting
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod plan_runner;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use hvharness_core::TargetKind;

use crate::version::HVHARNESS_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Render a diagnostic (source snippet, code, help) as the message.
    pub fn diagnostic(error: impl miette::Diagnostic + Send + Sync + 'static) -> Self {
        Self::failure(format!("{:?}", miette::Report::new(error)))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Multi-console test harness for hypervisor boot and guest runs
#[derive(Parser, Debug)]
#[command(name = "hvharness")]
#[command(version = HVHARNESS_VERSION)]
#[command(about = "Multi-console test harness for hypervisor boot and guest runs", long_about = None)]
pub struct Cli {
    /// Harness configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one test on one target and append its row to the results file
    Run {
        #[arg(value_name = "TEST")]
        test_name: String,
        /// Subtest, or `none`
        #[arg(value_name = "SUBTEST")]
        subtest: String,
        #[arg(value_name = "CONSOLES")]
        console_count: usize,
        /// Consoles that must finish successfully
        #[arg(value_name = "REQUIRED")]
        required_console_count: usize,
        #[arg(value_name = "TARGET")]
        target: String,
        /// Ledger to append to
        #[arg(value_name = "RESULTS")]
        results_file: PathBuf,
    },

    /// Run every test of a plan file on one target
    Plan {
        #[arg(value_name = "PLAN")]
        plan_file: PathBuf,
        #[arg(value_name = "TARGET")]
        target: String,
        /// Keep existing logs and append to the existing results file
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Merge `<target>_results.txt` ledgers into one table
    Report {
        /// Directory holding the ledgers (default: configured results directory)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Emit JSON instead of a text table
        #[arg(long)]
        json: bool,
    },

    /// Print execution statistics from a simulator event feed
    Stats {
        #[arg(value_name = "FEED")]
        feed: PathBuf,
    },

    /// Watch a secondary console (started by `run`)
    #[command(hide = true)]
    Listen {
        /// Command attaching to the console
        #[arg(value_name = "COMMAND")]
        command: String,
        #[arg(value_name = "LOG")]
        log: PathBuf,
        /// Run the Linux login / LWE / reset-status dialogue
        #[arg(long)]
        linux: bool,
        /// Test name, used to find the test's behavior
        #[arg(long = "test", value_name = "NAME")]
        test_name: Option<String>,
        #[arg(long, value_name = "NAME")]
        full_name: Option<String>,
    },

    /// Supervise console 0 (started by `run`)
    #[command(hide = true)]
    Boot {
        #[arg(value_name = "COMMAND")]
        command: String,
        #[arg(value_name = "LOG")]
        log: PathBuf,
        #[arg(long = "test", value_name = "NAME")]
        test_name: String,
        #[arg(long, value_name = "NAME")]
        full_name: String,
        /// `sim` or `hw`
        #[arg(long, value_name = "KIND", value_parser = parse_target_kind)]
        target_type: TargetKind,
    },

    /// Start the console mux on the remote console server (started by `run`)
    #[command(hide = true, name = "remote-hw")]
    RemoteHw {
        #[arg(value_name = "MUX_CMD")]
        mux_command: String,
    },
}

fn parse_target_kind(text: &str) -> Result<TargetKind, String> {
    TargetKind::from_short(text).ok_or_else(|| format!("expected `sim` or `hw`, found `{text}`"))
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let config_path = cli.config;
    let config = commands::load_config(config_path.as_deref())?;

    match cli.command {
        Command::Run {
            test_name,
            subtest,
            console_count,
            required_console_count,
            target,
            results_file,
        } => {
            let spec =
                crate::coordinator::TestSpec::new(&test_name, &subtest, console_count, required_console_count, &target);
            commands::run_test(config, config_path, &spec, &results_file)
        }
        Command::Plan {
            plan_file,
            target,
            no_cleanup,
        } => plan_runner::run_plan(config, config_path, &plan_file, &target, !no_cleanup),
        Command::Report { dir, json } => {
            let dir = dir.unwrap_or_else(|| config.paths.results_dir.clone());
            commands::report(&dir, json)
        }
        Command::Stats { feed } => commands::stats(&feed),
        Command::Listen {
            command,
            log,
            linux,
            test_name,
            full_name,
        } => commands::listen(&config, &command, &log, linux, test_name.as_deref(), full_name.as_deref()),
        Command::Boot {
            command,
            log,
            test_name,
            full_name,
            target_type,
        } => commands::boot(&config, &command, &log, &test_name, &full_name, target_type),
        Command::RemoteHw { mux_command } => commands::remote_hw(&config, &mux_command),
    }
}

// ============================================================================
// Tests
// ============================================================================
