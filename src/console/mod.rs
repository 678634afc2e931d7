//! Live console sessions
//!
//! A [`Console`] runs one shell command (typically `socat` attached to a multiplexer port), records everything
//! it prints into a log sink, and lets callers wait for patterns with per-step timeouts and send input back.
//!
//! ## Design
//!
//! - The attached command runs under `sh -c` on a pseudo-terminal that is also its controlling terminal, in a
//!   session of its own. Prompts written to `/dev/tty` (ssh) and errors written to stderr (`Connection refused`)
//!   both land in the transcript. The terminal echoes input and turns `\n` into `\r\n` on output.
//! - Lines are sent with a carriage return, as typed at a terminal.
//! - Output is appended to an unread buffer; a successful [`Console::expect`] consumes the buffer up to the end
//!   of the match. Text before the match is returned in [`Match::before`].
//! - Each wait has its own deadline. Reads are cancel-safe, so a timeout never loses output.

#[cfg(not(unix))]
compile_error!("console sessions need a unix pseudo-terminal");

pub mod pattern;
mod pty;

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::process::signal::{self, Signal};

pub use pattern::Pattern;
use pty::PtyMaster;

/// Terminator of a line sent with [`Console::send_line`].
pub const LINE_END: &str = "\r";

/// Size of a single read from the attached process.
const READ_CHUNK: usize = 4096;

/// How long `close` waits for the attached process to go away after killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Destination of the console transcript.
pub type LogSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors raised while driving a console.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("failed to start console command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {:.1}s waiting for {expected}", timeout.as_secs_f64())]
    Timeout { expected: String, timeout: Duration },

    #[error("console closed while waiting for {expected}")]
    Closed { expected: String },

    #[error("console I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConsoleError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConsoleError::Timeout { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConsoleError::Closed { .. })
    }
}

/// A successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the pattern that matched, in the order given to `expect`.
    pub index: usize,
    /// Unread output preceding the match.
    pub before: String,
    /// The matched text itself.
    pub matched: String,
}

/// Incremental UTF-8 decoding of console output.
///
/// A character split across two reads is held back until its remaining bytes arrive; invalid bytes become
/// U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    partial: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8], out: &mut String) {
        self.partial.extend_from_slice(bytes);
        let mut rest: &[u8] = &self.partial;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.partial = rest.to_vec();
    }

    /// Flush a truncated character at end of stream.
    fn finish(&mut self, out: &mut String) {
        if !self.partial.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.partial));
            self.partial.clear();
        }
    }
}

/// A running console session.
pub struct Console {
    command: String,
    child: Child,
    pty: Option<PtyMaster>,
    log: LogSink,
    buffer: String,
    decoder: Utf8Decoder,
    closed: bool,
}

impl Console {
    /// Start `command` under `sh -c` on a fresh pseudo-terminal, recording its output into `log`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(command: &str, log: LogSink) -> Result<Self, ConsoleError> {
        let spawn_error = |source| ConsoleError::Spawn {
            command: command.to_string(),
            source,
        };
        let (master, slave) = pty::open().map_err(spawn_error)?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        pty::attach(&mut cmd, &slave).map_err(spawn_error)?;
        let child = cmd.spawn().map_err(spawn_error)?;
        // Only the child may hold the slave side from here on.
        drop(cmd);
        drop(slave);

        tracing::debug!(command, pid = child.id(), "console attached");

        Ok(Self {
            command: command.to_string(),
            child,
            pty: Some(master),
            log,
            buffer: String::new(),
            decoder: Utf8Decoder::default(),
            closed: false,
        })
    }

    /// Start `command` with its transcript written to a fresh file at `log_path`.
    pub async fn spawn_logged(command: &str, log_path: &Path) -> Result<Self, ConsoleError> {
        let file = tokio::fs::File::create(log_path).await?;
        Self::spawn(command, Box::new(file))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Output received but not yet consumed by a match.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Wait for the earliest occurrence of any pattern.
    ///
    /// When several patterns match, the one starting first in the output wins; ties go to the lower index.
    pub async fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> Result<Match, ConsoleError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.take_match(patterns) {
                return Ok(found);
            }
            if self.closed {
                return Err(ConsoleError::Closed {
                    expected: pattern::describe(patterns),
                });
            }
            if !self.read_chunk(deadline).await? {
                return Err(ConsoleError::Timeout {
                    expected: pattern::describe(patterns),
                    timeout,
                });
            }
        }
    }

    /// Wait for a literal substring.
    pub async fn expect_exact(&mut self, text: &str, timeout: Duration) -> Result<Match, ConsoleError> {
        self.expect(&[Pattern::exact(text)], timeout).await
    }

    /// Read the rest of the current line, without its terminator.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<String, ConsoleError> {
        let found = self.expect(&[Pattern::exact("\n")], timeout).await?;
        Ok(found.before.trim_end_matches('\r').to_string())
    }

    /// Drain output until the attached process closes its stream.
    pub async fn wait_closed(&mut self, timeout: Duration) -> Result<(), ConsoleError> {
        let deadline = Instant::now() + timeout;
        while !self.closed {
            if !self.read_chunk(deadline).await? {
                return Err(ConsoleError::Timeout {
                    expected: "end of stream".to_string(),
                    timeout,
                });
            }
        }
        Ok(())
    }

    /// Send raw text.
    pub async fn send(&mut self, text: &str) -> Result<(), ConsoleError> {
        let pty = self
            .pty
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "console already closed"))?;
        pty.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// Send text followed by [`LINE_END`].
    pub async fn send_line(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.send(&format!("{text}{LINE_END}")).await
    }

    /// Append a diagnostic line to the transcript without sending it to the console.
    pub async fn append_log(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.log.write_all(text.as_bytes()).await?;
        self.log.flush().await?;
        Ok(())
    }

    /// Hang up the terminal, kill the attached session and reap it.
    pub async fn close(&mut self) -> Result<(), ConsoleError> {
        self.pty.take();
        self.kill_session();
        let _ = self.child.start_kill();
        if tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await.is_err() {
            tracing::warn!(command = %self.command, "console process did not exit after kill");
        }
        self.log.flush().await?;
        self.closed = true;
        Ok(())
    }

    fn take_match(&mut self, patterns: &[Pattern]) -> Option<Match> {
        let (index, start, end) = patterns
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.find(&self.buffer).map(|(start, end)| (i, start, end)))
            .min_by_key(|&(i, start, _)| (start, i))?;

        let before = self.buffer[..start].to_string();
        let matched = self.buffer[start..end].to_string();
        self.buffer.drain(..end);
        Some(Match { index, before, matched })
    }

    /// Read one chunk before `deadline`. Returns `false` if the deadline passed first.
    async fn read_chunk(&mut self, deadline: Instant) -> Result<bool, ConsoleError> {
        let Some(pty) = self.pty.as_ref() else {
            self.closed = true;
            return Ok(true);
        };
        let mut chunk = [0u8; READ_CHUNK];
        let n = match tokio::time::timeout_at(deadline, pty.read(&mut chunk)).await {
            Ok(read) => read?,
            Err(_elapsed) => return Ok(false),
        };
        if n == 0 {
            self.decoder.finish(&mut self.buffer);
            self.closed = true;
            return Ok(true);
        }
        self.log.write_all(&chunk[..n]).await?;
        self.log.flush().await?;
        self.decoder.decode(&chunk[..n], &mut self.buffer);
        Ok(true)
    }

    /// SIGKILL the attached session. The shell leads it, so its pid is the group id.
    fn kill_session(&self) {
        if let Some(pid) = self.child.id() {
            // The session may already be gone.
            let _ = signal::send_to_group(pid, Signal::Kill);
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        // `kill_on_drop` only reaches the shell.
        self.kill_session();
    }
}
