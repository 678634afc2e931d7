//! Multi-console run coordinator
//!
//! One run boots one test on one target with several consoles attached, and ends with one ledger row:
//!
//! ```text
//! STARTING  mux, then simulator (or hardware settle pause), then console 0 (boot) and consoles 1..N-1
//! RUNNING   poll every console once per tick until the quorum is met or every console exited
//! DRAINING  stop the simulator, the mux and any console still running
//! DONE      scan the console logs and append the row
//! ```
//!
//! ## Notes
//!
//! - The coordinator is single-threaded and never blocks on a child: it polls exit codes and sleeps.
//! - Consoles are child copies of the harness (`boot` / `listen` subcommands); each owns its console log.
//! - Only operational failures (log directory, mux spawn, ledger) are errors. Console failures end up in the row.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use hvharness_core::{MarkerCounts, QuorumProgress, QuorumTracker, TargetKind, Verdict};
use thiserror::Error;

use crate::config::HarnessConfig;
use crate::events::{self, ExecutionStats};
use crate::ledger::{Ledger, LedgerError, LedgerRow};
use crate::logscan;
use crate::mux;
use crate::process::{ProcessLauncher, ProcessRole, ProcessSpec, SelfInvocation, Supervised};

/// Subtest placeholder meaning "no subtest".
pub const NO_SUBTEST: &str = "none";

/// Exit code recorded for a console whose listener could not be started or polled.
const UNSTARTED_EXIT: i32 = -1;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("test name must not be empty")]
    EmptyName,

    #[error("invalid quorum: {required} of {count} consoles (need required <= count)")]
    InvalidQuorum { count: usize, required: usize },

    #[error("{count} consoles starting at port {start} exceed the TCP port range")]
    PortRange { start: u16, count: usize },

    #[error("cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot start {role}: {source}")]
    Spawn {
        role: ProcessRole,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// `name` or `name-subtest`; the subtest `none` (or an empty one) is dropped.
pub fn full_name(name: &str, subtest: &str) -> String {
    if subtest.is_empty() || subtest == NO_SUBTEST {
        name.to_string()
    } else {
        format!("{name}-{subtest}")
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSpec {
    pub name: String,
    pub subtest: Option<String>,
    pub console_count: usize,
    pub required_console_count: usize,
    pub target: String,
}

impl TestSpec {
    /// Build a spec from command-line style arguments (`subtest` may be `none`).
    pub fn new(name: &str, subtest: &str, console_count: usize, required_console_count: usize, target: &str) -> Self {
        let subtest = (!subtest.is_empty() && subtest != NO_SUBTEST).then(|| subtest.to_string());
        Self {
            name: name.to_string(),
            subtest,
            console_count,
            required_console_count,
            target: target.to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.name, self.subtest.as_deref().unwrap_or(NO_SUBTEST))
    }

    pub fn target_kind(&self) -> TargetKind {
        TargetKind::classify(&self.target)
    }

    /// Check the spec and build its quorum rule. Nothing is spawned for an invalid spec.
    pub fn validate(&self) -> Result<QuorumTracker, RunError> {
        if self.name.is_empty() {
            return Err(RunError::EmptyName);
        }
        QuorumTracker::new(self.console_count, self.required_console_count).ok_or(RunError::InvalidQuorum {
            count: self.console_count,
            required: self.required_console_count,
        })
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Running,
    Draining,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Starting => "STARTING",
            RunState::Running => "RUNNING",
            RunState::Draining => "DRAINING",
            RunState::Done => "DONE",
        })
    }
}

/// Planned console of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSlot {
    pub index: usize,
    /// Shell command attaching to the console port.
    pub attach_command: String,
    pub log_path: PathBuf,
    /// The listener child running `attach_command`.
    pub process: ProcessSpec,
}

/// Everything a run will start and where it writes, computed before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub full_name: String,
    pub kind: TargetKind,
    pub log_dir: PathBuf,
    pub ports: Vec<u16>,
    pub mux: ProcessSpec,
    pub simulator: Option<ProcessSpec>,
    pub consoles: Vec<ConsoleSlot>,
    /// Optional simulator event feed, read after the run.
    pub events_path: PathBuf,
}

impl RunPlan {
    pub fn new(spec: &TestSpec, config: &HarnessConfig, harness: &SelfInvocation) -> Result<Self, RunError> {
        let full = spec.full_name();
        let kind = spec.target_kind();
        let log_dir = config.log_dir(&spec.target);
        let start_port = config.consoles.start_port;
        let ports = mux::console_ports(start_port, spec.console_count).ok_or(RunError::PortRange {
            start: start_port,
            count: spec.console_count,
        })?;

        let server = match kind {
            TargetKind::Simulated => "localhost",
            TargetKind::Hardware => config.remote.server.as_str(),
        };
        let is_linux = config.is_linux_test(&spec.name);
        let consoles = ports
            .iter()
            .enumerate()
            .map(|(index, port)| {
                let attach_command = format!("{}{}:{}", config.consoles.attach_command, server, port);
                let log_path = log_dir.join(format!("{full}-con{index}.log"));
                let process = console_process(harness, spec, &full, index, is_linux, &attach_command, &log_path);
                ConsoleSlot {
                    index,
                    attach_command,
                    log_path,
                    process,
                }
            })
            .collect();

        let mux = mux::mux_spec(config, kind, &ports, harness, &log_dir.join(format!("{full}-mux.log")));
        let simulator = match kind {
            TargetKind::Simulated => Some(simulator_spec(spec, config, &log_dir.join(format!("{full}-sim.log")))),
            TargetKind::Hardware => None,
        };

        Ok(Self {
            events_path: log_dir.join(format!("{full}-events.jsonl")),
            full_name: full,
            kind,
            log_dir,
            ports,
            mux,
            simulator,
            consoles,
        })
    }

    pub fn log_paths(&self) -> Vec<PathBuf> {
        self.consoles.iter().map(|c| c.log_path.clone()).collect()
    }
}

fn console_process(
    harness: &SelfInvocation,
    spec: &TestSpec,
    full: &str,
    index: usize,
    is_linux: bool,
    attach_command: &str,
    log_path: &std::path::Path,
) -> ProcessSpec {
    let log = log_path.display().to_string();
    if index == 0 {
        return harness.spec(
            "boot",
            [
                attach_command.to_string(),
                log,
                "--test".to_string(),
                spec.name.clone(),
                "--full-name".to_string(),
                full.to_string(),
                "--target-type".to_string(),
                spec.target_kind().as_str().to_string(),
            ],
        );
    }
    let mut args = vec![attach_command.to_string(), log];
    if is_linux {
        args.extend([
            "--linux".to_string(),
            "--test".to_string(),
            spec.name.clone(),
            "--full-name".to_string(),
            full.to_string(),
        ]);
    }
    harness.spec("listen", args)
}

fn simulator_spec(spec: &TestSpec, config: &HarnessConfig, log_path: &std::path::Path) -> ProcessSpec {
    let suffix = spec.subtest.as_deref().map(|s| format!("-{s}")).unwrap_or_default();
    let script = config.paths.test_root.join(&spec.name).join(format!("run{suffix}.simics"));
    ProcessSpec::new(&config.simulator.program)
        .args([
            "-e".to_string(),
            format!("$target={}", spec.target),
            script.display().to_string(),
            "-e".to_string(),
            "c".to_string(),
        ])
        .current_dir(&config.paths.bin_path)
        .output_to(log_path)
        .with_stdin()
}

/// Outcome of one run, as written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub test_name: String,
    pub verdict: Verdict,
    pub counts: MarkerCounts,
    /// Quorum counts observed on the tick that ended the run.
    pub progress: QuorumProgress,
}

impl RunResult {
    pub fn to_row(&self) -> LedgerRow {
        LedgerRow::executed(&self.test_name, &self.counts)
    }
}

/// A console while the run is in progress.
pub struct ConsoleProcess {
    pub index: usize,
    pub command: String,
    pub log_path: PathBuf,
    handle: Option<Box<dyn Supervised>>,
    pub exit_code: Option<i32>,
}

impl ConsoleProcess {
    fn poll(&mut self) -> Option<i32> {
        if self.exit_code.is_some() {
            return self.exit_code;
        }
        let Some(handle) = self.handle.as_mut() else {
            return self.exit_code;
        };
        match handle.try_exit_code() {
            Ok(code) => self.exit_code = code,
            Err(e) => {
                tracing::warn!(console = self.index, error = %e, "cannot poll console, treating it as failed");
                self.exit_code = Some(UNSTARTED_EXIT);
            }
        }
        if let Some(code) = self.exit_code {
            tracing::info!(console = self.index, code, "console finished");
        }
        self.exit_code
    }
}

struct ActiveRun {
    state: RunState,
    mux: Box<dyn Supervised>,
    simulator: Option<Box<dyn Supervised>>,
    consoles: Vec<ConsoleProcess>,
}

impl ActiveRun {
    fn enter(&mut self, state: RunState) {
        tracing::info!(from = %self.state, to = %state, "run state");
        self.state = state;
    }
}

/// Runs tests, one at a time.
pub struct RunCoordinator<L: ProcessLauncher> {
    config: HarnessConfig,
    harness: SelfInvocation,
    launcher: L,
}

impl<L: ProcessLauncher> RunCoordinator<L> {
    pub fn new(config: HarnessConfig, harness: SelfInvocation, launcher: L) -> Self {
        Self {
            config,
            harness,
            launcher,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run one test and append its row to `ledger`.
    pub fn run(&mut self, spec: &TestSpec, ledger: &Ledger) -> Result<RunResult, RunError> {
        let quorum = spec.validate()?;
        let plan = RunPlan::new(spec, &self.config, &self.harness)?;
        tracing::info!(
            test = %plan.full_name,
            target = %spec.target,
            consoles = spec.console_count,
            required = spec.required_console_count,
            "starting run"
        );

        let mut active = self.start(&plan)?;
        active.enter(RunState::Running);
        let progress = self.wait_for_quorum(&mut active, &quorum);
        active.enter(RunState::Draining);
        self.drain(&mut active);
        active.enter(RunState::Done);

        let result = self.collect(&plan, progress);
        ledger.append(&result.to_row())?;
        tracing::info!(test = %result.test_name, verdict = %result.verdict, "run recorded");
        Ok(result)
    }

    fn start(&mut self, plan: &RunPlan) -> Result<ActiveRun, RunError> {
        std::fs::create_dir_all(&plan.log_dir).map_err(|source| RunError::LogDir {
            path: plan.log_dir.clone(),
            source,
        })?;

        let mux = self
            .launcher
            .launch(ProcessRole::Multiplexer, &plan.mux)
            .map_err(|source| RunError::Spawn {
                role: ProcessRole::Multiplexer,
                source,
            })?;

        let simulator = match &plan.simulator {
            Some(spec) => match self.launcher.launch(ProcessRole::Simulator, spec) {
                Ok(process) => Some(process),
                Err(e) => {
                    // Consoles will report the missing target through their own logs.
                    tracing::error!(error = %e, command = %spec.display_command(), "cannot start simulator");
                    None
                }
            },
            None => {
                let settle = self.config.timing.hardware_settle();
                tracing::info!(secs = settle.as_secs_f64(), "waiting for hardware to come up");
                thread::sleep(settle);
                None
            }
        };

        let consoles = plan
            .consoles
            .iter()
            .map(|slot| {
                let role = ProcessRole::Console(slot.index);
                let (handle, exit_code) = match self.launcher.launch(role, &slot.process) {
                    Ok(handle) => (Some(handle), None),
                    Err(e) => {
                        tracing::warn!(console = slot.index, error = %e, "cannot start console listener");
                        (None, Some(UNSTARTED_EXIT))
                    }
                };
                ConsoleProcess {
                    index: slot.index,
                    command: slot.attach_command.clone(),
                    log_path: slot.log_path.clone(),
                    handle,
                    exit_code,
                }
            })
            .collect();

        Ok(ActiveRun {
            state: RunState::Starting,
            mux,
            simulator,
            consoles,
        })
    }

    fn wait_for_quorum(&self, active: &mut ActiveRun, quorum: &QuorumTracker) -> QuorumProgress {
        let poll = self.config.timing.poll_interval();
        let mut ticks: u64 = 0;
        loop {
            let codes: Vec<Option<i32>> = active.consoles.iter_mut().map(ConsoleProcess::poll).collect();
            let progress = quorum.observe(&codes);
            ticks += 1;
            tracing::debug!(
                tick = ticks,
                finished = progress.finished,
                required_finished = progress.required_finished,
                "poll"
            );
            if progress.complete {
                tracing::info!(
                    finished = progress.finished,
                    required_finished = progress.required_finished,
                    ticks,
                    "quorum reached"
                );
                return progress;
            }
            thread::sleep(poll);
        }
    }

    fn drain(&self, active: &mut ActiveRun) {
        let timing = &self.config.timing;
        if let Some(sim) = active.simulator.as_mut() {
            stop_simulator(sim.as_mut(), &self.config.simulator.quit_command, timing.sim_interrupt_grace(), timing.sim_quit_grace());
        }

        if let Err(e) = active.mux.interrupt() {
            tracing::warn!(error = %e, "cannot interrupt mux");
        }

        for console in &mut active.consoles {
            if console.poll().is_some() {
                continue;
            }
            if let Some(handle) = console.handle.as_mut() {
                tracing::info!(console = console.index, "terminating console");
                if let Err(e) = handle.terminate() {
                    tracing::warn!(console = console.index, error = %e, "cannot terminate console");
                }
            }
        }

        // Reap whatever already exited; the rest are reaped when their handles drop.
        if let Err(e) = active.mux.try_exit_code() {
            tracing::debug!(error = %e, "cannot reap mux");
        }
        for console in &mut active.consoles {
            if let Some(handle) = console.handle.as_mut() {
                if let Err(e) = handle.try_exit_code() {
                    tracing::debug!(console = console.index, error = %e, "cannot reap console");
                }
            }
        }
    }

    fn collect(&self, plan: &RunPlan, progress: QuorumProgress) -> RunResult {
        let counts = logscan::scan_logs(&plan.log_paths());
        if plan.kind == TargetKind::Simulated && plan.events_path.is_file() {
            match events::read_feed(&plan.events_path) {
                Ok(feed) => {
                    let stats = ExecutionStats::from_events(&feed);
                    tracing::info!(
                        events = feed.len(),
                        cpus = stats.cpus().count(),
                        exceptions = stats.total_exceptions(),
                        "simulator event feed"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "ignoring malformed simulator event feed"),
            }
        }
        RunResult {
            test_name: plan.full_name.clone(),
            verdict: counts.verdict(),
            counts,
            progress,
        }
    }
}

/// SIGINT, wait, `quit`, wait, SIGTERM if still alive.
fn stop_simulator(sim: &mut dyn Supervised, quit_command: &str, interrupt_grace: Duration, quit_grace: Duration) {
    if let Err(e) = sim.interrupt() {
        tracing::warn!(error = %e, "cannot interrupt simulator");
    }
    thread::sleep(interrupt_grace);
    if let Err(e) = sim.write_input(quit_command) {
        tracing::warn!(error = %e, "cannot send quit to simulator");
    }
    thread::sleep(quit_grace);
    match sim.try_exit_code() {
        Ok(Some(code)) => tracing::info!(code, "simulator exited"),
        Ok(None) | Err(_) => {
            tracing::info!("terminating simulator");
            if let Err(e) = sim.terminate() {
                tracing::warn!(error = %e, "cannot terminate simulator");
            }
        }
    }
}
