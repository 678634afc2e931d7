//! Console listeners
//!
//! A listener attaches to one console, waits for that console's completion pattern and exits with a status the
//! coordinator polls. Two flavours exist:
//!
//! - [`ListenerKind::Generic`]: bare-metal partitions printing `Test Complete`.
//! - [`ListenerKind::Linux`]: secondary consoles of Linux tests. They either boot Linux (login, shell probe, then
//!   the test's [`Behavior::on_secondary_ready`] hook), run the LWE hello partition, or run the reset-status
//!   partition test.
//!
//! Failures are reported twice: as a non-zero [`ListenOutcome::exit_code`] and as a diagnostic line appended to
//! the console log (`TIMEOUT` is counted by the log scanner, the stream-closed line is not).

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use hvharness_core::markers;

use crate::behavior::Behavior;
use crate::console::{Console, ConsoleError, Pattern};

/// Which dialogue a listener runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Generic,
    Linux,
}

impl ListenerKind {
    /// Listener flavour for the secondary consoles of a test.
    pub fn for_test(is_linux_test: bool) -> Self {
        if is_linux_test { ListenerKind::Linux } else { ListenerKind::Generic }
    }
}

/// Per-step timeouts of the listener dialogues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerTimeouts {
    /// Generic listener wait for `Test Complete`.
    pub completion: Duration,
    /// Linux listener wait for the first recognisable banner.
    pub first_banner: Duration,
    /// Reset-status test: wait for each "stopped by" line.
    pub partition_stop: Duration,
    /// Reset-status test: wait for `Test Complete` after each stop.
    pub partition_complete: Duration,
    /// Login prompt and shell probe.
    pub shell: Duration,
    /// Pause before closing after a successful dialogue.
    pub settle: Duration,
}

impl Default for ListenerTimeouts {
    fn default() -> Self {
        Self {
            completion: Duration::from_secs(300),
            first_banner: Duration::from_secs(360),
            partition_stop: Duration::from_secs(30),
            partition_complete: Duration::from_secs(3),
            shell: Duration::from_secs(60),
            settle: Duration::from_secs(1),
        }
    }
}

/// How a listener ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    Completed,
    TimedOut,
    StreamClosed,
    /// The test behavior returned a non-zero status.
    BehaviorFailed(i32),
    /// The attach command could not be started.
    SpawnFailed,
}

impl ListenOutcome {
    /// Process exit status reported to the coordinator. Only [`ListenOutcome::Completed`] is zero.
    pub fn exit_code(self) -> i32 {
        match self {
            ListenOutcome::Completed => 0,
            ListenOutcome::TimedOut => 2,
            ListenOutcome::StreamClosed => 3,
            ListenOutcome::BehaviorFailed(_) => 4,
            ListenOutcome::SpawnFailed => 5,
        }
    }

    /// Map a failed console wait to an outcome.
    pub fn from_console_error(error: &ConsoleError) -> Self {
        match error {
            ConsoleError::Timeout { .. } => ListenOutcome::TimedOut,
            ConsoleError::Spawn { .. } => ListenOutcome::SpawnFailed,
            ConsoleError::Closed { .. } | ConsoleError::Io(_) => ListenOutcome::StreamClosed,
        }
    }
}

/// Drive a console through a listener dialogue.
///
/// Returns the behavior status (0 when no behavior ran or it succeeded).
pub async fn drive(
    console: &mut Console,
    kind: ListenerKind,
    timeouts: &ListenerTimeouts,
    behavior: &mut dyn Behavior,
) -> Result<i32, ConsoleError> {
    match kind {
        ListenerKind::Generic => {
            console.expect_exact(markers::TEST_COMPLETE, timeouts.completion).await?;
            tokio::time::sleep(timeouts.settle).await;
            Ok(0)
        }
        ListenerKind::Linux => drive_linux(console, timeouts, behavior).await,
    }
}

async fn drive_linux(
    console: &mut Console,
    timeouts: &ListenerTimeouts,
    behavior: &mut dyn Behavior,
) -> Result<i32, ConsoleError> {
    let banners = [
        Pattern::exact(markers::LOGIN_PROMPT),
        Pattern::exact(markers::LWE_HELLO),
        Pattern::exact(markers::RESET_STATUS_TEST),
    ];
    let found = console.expect(&banners, timeouts.first_banner).await?;
    match found.index {
        1 => {
            tracing::debug!("LWE partition said hello");
            Ok(0)
        }
        2 => {
            console.expect_exact(markers::STOPPED_BY_MANAGER, timeouts.partition_stop).await?;
            console.expect_exact(markers::TEST_COMPLETE, timeouts.partition_complete).await?;
            console.expect_exact(markers::STOPPED_BY_SHELL, timeouts.partition_stop).await?;
            console.expect_exact(markers::TEST_COMPLETE, timeouts.partition_complete).await?;
            Ok(0)
        }
        _ => {
            console.send_line(markers::LOGIN_USER).await?;
            let prompt = Pattern::regex(markers::ROOT_PROMPT_RE).map_err(io::Error::other)?;
            console.expect(&[prompt], timeouts.shell).await?;
            console.send_line(markers::SHELL_PROBE).await?;
            console.expect_exact(markers::SHELL_PROBE_REPLY, timeouts.shell).await?;
            let status = behavior.on_secondary_ready(console).await?;
            tokio::time::sleep(timeouts.settle).await;
            Ok(status)
        }
    }
}

/// Close the console and record how the dialogue ended in its log.
pub async fn conclude(console: &mut Console, result: Result<i32, ConsoleError>) -> ListenOutcome {
    let outcome = match &result {
        Ok(0) => ListenOutcome::Completed,
        Ok(status) => {
            tracing::warn!(status, command = console.command(), "console behavior reported failure");
            ListenOutcome::BehaviorFailed(*status)
        }
        Err(e) => {
            tracing::warn!(error = %e, command = console.command(), "console listener failed");
            ListenOutcome::from_console_error(e)
        }
    };

    if let Err(e) = console.close().await {
        tracing::warn!(error = %e, "failed to close console");
    }
    let note = match outcome {
        ListenOutcome::TimedOut => Some(markers::TIMEOUT_LOG_LINE),
        ListenOutcome::StreamClosed => Some(markers::STREAM_CLOSED_LOG_LINE),
        _ => None,
    };
    if let Some(note) = note {
        if let Err(e) = console.append_log(note).await {
            tracing::warn!(error = %e, "failed to append listener diagnostic to log");
        }
    }
    outcome
}

/// Run a complete listener: attach, drive the dialogue, close.
pub async fn listen(
    command: &str,
    log_path: &Path,
    kind: ListenerKind,
    timeouts: &ListenerTimeouts,
    behavior: &mut dyn Behavior,
) -> ListenOutcome {
    let mut console = match Console::spawn_logged(command, log_path).await {
        Ok(console) => console,
        Err(e) => {
            record_spawn_failure(log_path, &e);
            return ListenOutcome::SpawnFailed;
        }
    };
    let result = drive(&mut console, kind, timeouts, behavior).await;
    conclude(&mut console, result).await
}

/// Leave a trace of a failed attach in the console log so the run's logs explain the missing transcript.
pub(crate) fn record_spawn_failure(log_path: &Path, error: &ConsoleError) {
    tracing::error!(error = %error, log = %log_path.display(), "cannot start console");
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .and_then(|mut f| writeln!(f, "{error}"));
    if let Err(e) = written {
        tracing::warn!(error = %e, log = %log_path.display(), "cannot write console log");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::behavior::NoopBehavior;
    use async_trait::async_trait;

    fn fast() -> ListenerTimeouts {
        ListenerTimeouts {
            completion: Duration::from_secs(5),
            first_banner: Duration::from_secs(5),
            partition_stop: Duration::from_secs(5),
            partition_complete: Duration::from_secs(5),
            shell: Duration::from_secs(5),
            settle: Duration::ZERO,
        }
    }

    struct Status(i32);

    #[async_trait]
    impl Behavior for Status {
        async fn on_secondary_ready(&mut self, console: &mut Console) -> Result<i32, ConsoleError> {
            console.send_line("ifconfig eth0 up").await?;
            console.expect_exact("ifconfig eth0 up", Duration::from_secs(5)).await?;
            Ok(self.0)
        }
    }

    async fn run(command: &str, kind: ListenerKind, timeouts: ListenerTimeouts) -> (ListenOutcome, String) {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("con1.log");
        let outcome = listen(command, &log, kind, &timeouts, &mut NoopBehavior).await;
        (outcome, std::fs::read_to_string(&log).unwrap())
    }

    #[tokio::test]
    async fn test_generic_completes_on_marker() {
        let (outcome, log) = run("printf 'hcall PASSED\\nTest Complete\\n'; sleep 5", ListenerKind::Generic, fast()).await;
        assert_eq!(outcome, ListenOutcome::Completed);
        assert_eq!(outcome.exit_code(), 0);
        assert!(log.contains("hcall PASSED"));
        assert!(!log.contains("TIMEOUT"));
    }

    #[tokio::test]
    async fn test_timeout_appends_marker() {
        let timeouts = ListenerTimeouts {
            completion: Duration::from_millis(100),
            ..fast()
        };
        let (outcome, log) = run("printf 'booting\\n'; sleep 5", ListenerKind::Generic, timeouts).await;
        assert_eq!(outcome, ListenOutcome::TimedOut);
        assert_ne!(outcome.exit_code(), 0);
        assert!(log.ends_with(markers::TIMEOUT_LOG_LINE), "log was {log:?}");
    }

    #[tokio::test]
    async fn test_closed_stream_appends_unscanned_line() {
        let (outcome, log) = run("echo 'socat: Connection refused'", ListenerKind::Generic, fast()).await;
        assert_eq!(outcome, ListenOutcome::StreamClosed);
        assert!(log.contains("Connection refused"));
        assert!(log.ends_with(markers::STREAM_CLOSED_LOG_LINE));
        assert!(!log.contains("TIMEOUT"));
    }

    #[tokio::test]
    async fn test_linux_lwe_hello_completes() {
        let (outcome, _) = run("printf 'Hello World! My LWE-id 1\\n'; sleep 5", ListenerKind::Linux, fast()).await;
        assert_eq!(outcome, ListenOutcome::Completed);
    }

    #[tokio::test]
    async fn test_linux_reset_status_sequence() {
        let script = "printf 'Reset status test\\nstopped by property:  manager\\nTest Complete\\n\
                      stopped by property:  shell\\nTest Complete\\n'; sleep 5";
        let (outcome, _) = run(script, ListenerKind::Linux, fast()).await;
        assert_eq!(outcome, ListenOutcome::Completed);
    }

    #[tokio::test]
    async fn test_linux_login_runs_behavior() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("con2.log");
        // A fake guest: login prompt, then echo everything back and answer like a shell would.
        let guest = "printf 'p4080 login: '; read user; printf 'root@p4080:~# '; read probe; echo Linux; cat";
        let outcome = listen(guest, &log, ListenerKind::Linux, &fast(), &mut Status(0)).await;
        assert_eq!(outcome, ListenOutcome::Completed);
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("ifconfig eth0 up"), "log was {text:?}");
    }

    #[tokio::test]
    async fn test_behavior_status_fails_listener() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("con2.log");
        let guest = "printf 'login: '; read user; printf 'root@hv:~# '; read probe; echo Linux; cat";
        let outcome = listen(guest, &log, ListenerKind::Linux, &fast(), &mut Status(3)).await;
        assert_eq!(outcome, ListenOutcome::BehaviorFailed(3));
        assert_ne!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_kind_for_test() {
        assert_eq!(ListenerKind::for_test(true), ListenerKind::Linux);
        assert_eq!(ListenerKind::for_test(false), ListenerKind::Generic);
    }

    #[test]
    fn test_only_completion_exits_zero() {
        for outcome in [
            ListenOutcome::TimedOut,
            ListenOutcome::StreamClosed,
            ListenOutcome::BehaviorFailed(1),
            ListenOutcome::SpawnFailed,
        ] {
            assert_ne!(outcome.exit_code(), 0, "{outcome:?}");
        }
    }
}
