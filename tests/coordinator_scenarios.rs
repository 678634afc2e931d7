//! Run coordinator scenarios with scripted fake processes
//!
//! The fake launcher plays every child of a run: it writes each console's transcript to the log path found on
//! the console's command line, then reports a scripted exit code after a number of polls. Every signal and
//! stdin write is recorded so teardown order can be checked.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hvharness::cli::plan_runner::{self, EntryOutcome, PlanReporter, PlanSummary};
use hvharness::config::{HarnessConfig, TimingConfig};
use hvharness::coordinator::{RunCoordinator, RunError, RunState, TestSpec};
use hvharness::ledger::Ledger;
use hvharness::plan::{self, PlanEntry};
use hvharness::process::{ProcessLauncher, ProcessRole, ProcessSpec, SelfInvocation, Supervised};
use hvharness::Verdict;

// =============================================================================
// Fake processes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Launch(ProcessRole),
    Interrupt(ProcessRole),
    Terminate(ProcessRole),
    Input(ProcessRole, String),
}

/// How one scripted console behaves.
#[derive(Debug, Clone)]
struct ConsoleScript {
    transcript: &'static str,
    /// Exit after this many polls with `code`; `None` runs until terminated.
    exit_after: Option<(u32, i32)>,
}

impl ConsoleScript {
    fn exits(transcript: &'static str, polls: u32, code: i32) -> Self {
        Self {
            transcript,
            exit_after: Some((polls, code)),
        }
    }

    fn hangs(transcript: &'static str) -> Self {
        Self {
            transcript,
            exit_after: None,
        }
    }
}

type Journal = Arc<Mutex<Vec<Event>>>;

struct FakeLauncher {
    consoles: HashMap<usize, ConsoleScript>,
    journal: Journal,
    fail_roles: Vec<ProcessRole>,
    /// Simulator exits by itself once it reads the quit command.
    sim_obeys_quit: bool,
    /// Polling the mux fails once it has been interrupted.
    mux_unreapable: bool,
}

impl FakeLauncher {
    fn new(consoles: Vec<ConsoleScript>) -> Self {
        Self {
            consoles: consoles.into_iter().enumerate().collect(),
            journal: Arc::default(),
            fail_roles: Vec::new(),
            sim_obeys_quit: true,
            mux_unreapable: false,
        }
    }

    fn events(&self) -> Vec<Event> {
        self.journal.lock().unwrap().clone()
    }
}

/// `[--config c] <subcommand> <attach command> <log> ...`
fn console_log_path(spec: &ProcessSpec) -> PathBuf {
    let start = spec.args.iter().position(|a| a == "boot" || a == "listen").unwrap();
    PathBuf::from(&spec.args[start + 2])
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&mut self, role: ProcessRole, spec: &ProcessSpec) -> io::Result<Box<dyn Supervised>> {
        if self.fail_roles.contains(&role) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("no such program for {role}")));
        }
        self.journal.lock().unwrap().push(Event::Launch(role));
        let exit_after = match role {
            ProcessRole::Console(index) => {
                let script = self.consoles.get(&index).cloned().unwrap_or(ConsoleScript::hangs(""));
                std::fs::write(console_log_path(spec), script.transcript)?;
                script.exit_after
            }
            _ => None,
        };
        Ok(Box::new(FakeProcess {
            role,
            journal: Arc::clone(&self.journal),
            exit_after,
            polls: 0,
            exited: None,
            exit_on_input: role == ProcessRole::Simulator && self.sim_obeys_quit,
            unreapable: role == ProcessRole::Multiplexer && self.mux_unreapable,
            interrupted: false,
        }))
    }
}

struct FakeProcess {
    role: ProcessRole,
    journal: Journal,
    exit_after: Option<(u32, i32)>,
    polls: u32,
    exited: Option<i32>,
    exit_on_input: bool,
    unreapable: bool,
    interrupted: bool,
}

impl Supervised for FakeProcess {
    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        if self.unreapable && self.interrupted {
            return Err(io::Error::other("wait failed"));
        }
        if self.exited.is_none() {
            self.polls += 1;
            if let Some((after, code)) = self.exit_after {
                if self.polls >= after {
                    self.exited = Some(code);
                }
            }
        }
        Ok(self.exited)
    }

    fn interrupt(&mut self) -> io::Result<()> {
        self.journal.lock().unwrap().push(Event::Interrupt(self.role));
        self.interrupted = true;
        Ok(())
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.journal.lock().unwrap().push(Event::Terminate(self.role));
        self.exited.get_or_insert(-1);
        Ok(())
    }

    fn write_input(&mut self, text: &str) -> io::Result<()> {
        self.journal.lock().unwrap().push(Event::Input(self.role, text.to_string()));
        if self.exit_on_input {
            self.exited = Some(0);
        }
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn config_in(dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.paths.log_root = dir.join("log");
    config.paths.results_dir = dir.to_path_buf();
    config.timing = TimingConfig::immediate();
    config
}

fn coordinator(dir: &Path, launcher: FakeLauncher) -> RunCoordinator<FakeLauncher> {
    RunCoordinator::new(config_in(dir), SelfInvocation::new("/opt/hvharness", None), launcher)
}

fn ledger_lines(ledger: &Ledger) -> Vec<String> {
    std::fs::read_to_string(ledger.path())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

const BOOT_PASS: &str = "Freescale Hypervisor\nhcall PASSED\nhcall PASSED\nhcall PASSED\n";

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn quorum_of_one_with_a_timed_out_console_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(vec![
        ConsoleScript::exits(BOOT_PASS, 1, 0),
        ConsoleScript::exits("partition booting\n\nTIMEOUT\n", 3, 2),
    ]);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let spec = TestSpec::new("testX", "none", 2, 1, "p4080ds");
    let result = coordinator.run(&spec, &ledger).unwrap();

    assert_eq!(result.verdict, Verdict::Warning);
    assert_eq!(result.progress.required_finished, 1);
    assert_eq!(
        ledger_lines(&ledger),
        vec!["Test Name,Result,Passes,Fails,Timeouts", "testX,WARNING,3,0,1"]
    );
}

#[test]
fn quorum_reached_drains_and_terminates_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(vec![
        ConsoleScript::hangs(BOOT_PASS),
        ConsoleScript::exits("Test Complete\n", 2, 0),
        ConsoleScript::exits("Test Complete\n", 2, 0),
        ConsoleScript::hangs("still booting\n"),
    ]);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let spec = TestSpec::new("mmu", "2p", 4, 2, "p4080ds");
    let result = coordinator.run(&spec, &ledger).unwrap();
    assert_eq!(result.progress.finished, 2);
    assert_eq!(result.progress.required_finished, 2);
    assert_eq!(result.verdict, Verdict::Passed);

    let events = coordinator.launcher().events();
    assert_eq!(
        events[..6],
        [
            Event::Launch(ProcessRole::Multiplexer),
            Event::Launch(ProcessRole::Simulator),
            Event::Launch(ProcessRole::Console(0)),
            Event::Launch(ProcessRole::Console(1)),
            Event::Launch(ProcessRole::Console(2)),
            Event::Launch(ProcessRole::Console(3)),
        ]
    );
    assert_eq!(
        events[6..],
        [
            Event::Interrupt(ProcessRole::Simulator),
            Event::Input(ProcessRole::Simulator, "quit\r".to_string()),
            Event::Interrupt(ProcessRole::Multiplexer),
            Event::Terminate(ProcessRole::Console(0)),
            Event::Terminate(ProcessRole::Console(3)),
        ]
    );
    assert!(ledger_lines(&ledger).contains(&"mmu-2p,PASSED,3,0,0".to_string()));
}

#[test]
fn all_consoles_failing_still_writes_a_row() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(vec![
        ConsoleScript::exits("Freescale Hypervisor\nhcall FAILED\n", 1, 3),
        ConsoleScript::exits("Connection refused\n", 2, 5),
    ]);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let result = coordinator.run(&TestSpec::new("hcalls", "none", 2, 2, "p4080ds"), &ledger).unwrap();
    assert_eq!(result.progress.finished, 2);
    assert_eq!(result.progress.required_finished, 0);
    assert_eq!(result.verdict, Verdict::Failed);
    assert_eq!(ledger_lines(&ledger)[1], "hcalls,FAILED,0,1,0");
}

#[test]
fn simulator_ignoring_quit_is_terminated() {
    let dir = tempfile::tempdir().unwrap();
    let mut launcher = FakeLauncher::new(vec![ConsoleScript::exits("PASSED\n", 1, 0)]);
    launcher.sim_obeys_quit = false;
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    coordinator.run(&TestSpec::new("hello", "none", 1, 1, "p4080ds"), &ledger).unwrap();
    assert!(coordinator
        .launcher()
        .events()
        .contains(&Event::Terminate(ProcessRole::Simulator)));
}

#[test]
fn hardware_run_has_no_simulator() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(vec![ConsoleScript::exits(BOOT_PASS, 1, 0)]);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_hw_results.txt")).unwrap();

    let result = coordinator.run(&TestSpec::new("hcalls", "none", 1, 1, "p4080ds_hw"), &ledger).unwrap();
    assert_eq!(result.verdict, Verdict::Passed);
    let events = coordinator.launcher().events();
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::Launch(ProcessRole::Simulator) | Event::Interrupt(ProcessRole::Simulator)
    )));
    assert!(events.contains(&Event::Interrupt(ProcessRole::Multiplexer)));
}

#[test]
fn unstartable_console_counts_as_failed_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mut launcher = FakeLauncher::new(vec![ConsoleScript::exits(BOOT_PASS, 1, 0)]);
    launcher.fail_roles.push(ProcessRole::Console(1));
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let result = coordinator.run(&TestSpec::new("hcalls", "none", 2, 2, "p4080ds"), &ledger).unwrap();
    assert_eq!(result.progress.finished, 2);
    assert_eq!(result.verdict, Verdict::Passed);
}

#[test]
fn mux_spawn_failure_is_an_error_without_a_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut launcher = FakeLauncher::new(vec![]);
    launcher.fail_roles.push(ProcessRole::Multiplexer);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let err = coordinator.run(&TestSpec::new("hcalls", "none", 1, 1, "p4080ds"), &ledger).unwrap_err();
    assert!(matches!(err, RunError::Spawn { role: ProcessRole::Multiplexer, .. }));
    assert_eq!(ledger_lines(&ledger).len(), 1);
}

#[test]
fn invalid_quorum_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = coordinator(dir.path(), FakeLauncher::new(vec![]));
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let err = coordinator.run(&TestSpec::new("hcalls", "none", 2, 3, "p4080ds"), &ledger).unwrap_err();
    assert!(matches!(err, RunError::InvalidQuorum { count: 2, required: 3 }));
    assert!(coordinator.launcher().events().is_empty());
    assert!(!dir.path().join("log").exists());
}

#[test]
fn zero_quorum_drains_on_the_first_tick() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(vec![ConsoleScript::hangs(BOOT_PASS), ConsoleScript::hangs("")]);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let result = coordinator.run(&TestSpec::new("hcalls", "none", 2, 0, "p4080ds"), &ledger).unwrap();
    assert_eq!(result.progress.finished, 0);
    let events = coordinator.launcher().events();
    assert!(events.contains(&Event::Terminate(ProcessRole::Console(0))));
    assert!(events.contains(&Event::Terminate(ProcessRole::Console(1))));
    assert_eq!(ledger_lines(&ledger)[1], "hcalls,PASSED,3,0,0");
}

#[test]
fn reap_errors_during_teardown_still_write_a_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut launcher = FakeLauncher::new(vec![ConsoleScript::exits(BOOT_PASS, 1, 0)]);
    launcher.mux_unreapable = true;
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();

    let result = coordinator.run(&TestSpec::new("hcalls", "none", 1, 1, "p4080ds"), &ledger).unwrap();
    assert_eq!(result.verdict, Verdict::Passed);
    assert!(coordinator
        .launcher()
        .events()
        .contains(&Event::Interrupt(ProcessRole::Multiplexer)));
    assert_eq!(ledger_lines(&ledger)[1], "hcalls,PASSED,3,0,0");
}

#[test]
fn event_feed_is_optional_and_malformed_feed_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(vec![ConsoleScript::exits("PASSED\n", 1, 0)]);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = Ledger::create(dir.path().join("p4080ds_results.txt")).unwrap();
    let log_dir = dir.path().join("log").join("p4080ds");
    std::fs::create_dir_all(&log_dir).unwrap();
    std::fs::write(log_dir.join("hello-events.jsonl"), "not json\n").unwrap();

    let result = coordinator.run(&TestSpec::new("hello", "none", 1, 1, "p4080ds"), &ledger).unwrap();
    assert_eq!(result.verdict, Verdict::Passed);
}

#[test]
fn run_states_print_in_order() {
    let names: Vec<String> = [RunState::Starting, RunState::Running, RunState::Draining, RunState::Done]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names.join(" -> "), "STARTING -> RUNNING -> DRAINING -> DONE");
}

// =============================================================================
// Plans
// =============================================================================

#[derive(Default)]
struct Recorder {
    started: Vec<(usize, String)>,
    outcomes: Vec<EntryOutcome>,
    summary: Option<PlanSummary>,
}

impl PlanReporter for Recorder {
    fn on_test_start(&mut self, number: usize, entry: &PlanEntry) {
        self.started.push((number, entry.full_name()));
    }

    fn on_test_complete(&mut self, _entry: &PlanEntry, outcome: &EntryOutcome) {
        self.outcomes.push(outcome.clone());
    }

    fn on_plan_complete(&mut self, summary: &PlanSummary) {
        self.summary = Some(summary.clone());
    }
}

#[test]
fn plan_runs_enabled_entries_and_records_disabled_ones() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(vec![
        ConsoleScript::exits(BOOT_PASS, 1, 0),
        ConsoleScript::exits("Test Complete\n", 1, 0),
    ]);
    let mut coordinator = coordinator(dir.path(), launcher);
    let ledger = plan_runner::prepare_campaign(coordinator.config(), "p4080ds", true).unwrap();
    let entries = plan::parse_plan(
        "# nightly\nhcalls,none,2,1,enabled\nlinux,e1000,3,2,disabled\nbad,none,1,2,enabled\n",
        "nightly.txt",
    )
    .unwrap();

    let mut recorder = Recorder::default();
    let summary = plan_runner::execute_plan(&mut coordinator, &entries, "p4080ds", &ledger, &mut recorder).unwrap();

    assert_eq!(
        recorder.started,
        vec![(1, "hcalls".to_string()), (2, "linux-e1000".to_string()), (3, "bad".to_string())]
    );
    assert!(matches!(recorder.outcomes[0], EntryOutcome::Ran { verdict: Verdict::Passed, .. }));
    assert_eq!(recorder.outcomes[1], EntryOutcome::NotExecuted);
    assert!(matches!(recorder.outcomes[2], EntryOutcome::Errored { .. }));
    assert_eq!((summary.total, summary.passed, summary.not_executed, summary.errored), (3, 1, 1, 1));
    assert_eq!(recorder.summary, Some(summary));

    assert_eq!(
        ledger_lines(&ledger),
        vec![
            "Test Name,Result,Passes,Fails,Timeouts",
            "hcalls,PASSED,3,0,0",
            "linux-e1000,NOT_EXECUTED,,,",
        ]
    );
}
