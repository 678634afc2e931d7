//! Console children stopped by the coordinator
//!
//! During teardown the coordinator sends SIGTERM to every console child still running. These tests run the
//! built binary and check that a terminated child takes its attach command down with it, since a surviving
//! attach command would stay connected to the multiplexer ports the next test reuses.

#![cfg(target_os = "linux")]

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use hvharness::cli::commands::TERMINATED_EXIT;
use hvharness::process::signal::{self, Signal};

const WAIT: Duration = Duration::from_secs(10);

/// Alive and not a zombie.
fn is_running(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| stat.rsplit_once(") ").map(|(_, rest)| !rest.starts_with('Z')))
        .unwrap_or(false)
}

fn wait_for_pid(path: &Path) -> u32 {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(pid) = std::fs::read_to_string(path).ok().and_then(|t| t.trim().parse().ok()) {
            return pid;
        }
        assert!(Instant::now() < deadline, "attach command never started");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn assert_gone(pid: u32) {
    let deadline = Instant::now() + WAIT;
    while is_running(pid) {
        assert!(Instant::now() < deadline, "attach command {pid} survived its console child");
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Start a console child whose attach command records its pid, then SIGTERM the child.
fn terminate_child(subcommand: &[&str]) {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("attach.pid");
    let attach = format!("echo $$ > {}; exec sleep 4321", pid_file.display());
    let log = dir.path().join("con.log");

    let mut child = Command::new(env!("CARGO_BIN_EXE_hvharness"))
        .arg(subcommand[0])
        .arg(&attach)
        .arg(&log)
        .args(&subcommand[1..])
        .current_dir(dir.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let attached = wait_for_pid(&pid_file);
    assert!(is_running(attached));

    signal::send(child.id(), Signal::Terminate).unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(TERMINATED_EXIT));
    assert_gone(attached);
}

#[test]
fn terminated_listener_kills_its_attach_command() {
    terminate_child(&["listen"]);
}

#[test]
fn terminated_boot_supervisor_kills_its_attach_command() {
    terminate_child(&["boot", "--test", "hcalls", "--full-name", "hcalls", "--target-type", "sim"]);
}
