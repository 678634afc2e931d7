//! Remote hardware helper
//!
//! Hardware targets have their consoles on a remote console server. This module logs in there over `ssh`,
//! resets the board, starts the multiplexer and then keeps the session open (streaming its output) until the
//! server closes it, a long timeout expires, or the coordinator interrupts us during teardown.
//!
//! ssh runs on the console's pseudo-terminal, so it prompts there for the host key and password and asks the
//! server for a terminal of its own, which gives us a shell prompt to wait for.

use std::time::Duration;

use crate::config::RemoteConfig;
use crate::console::{Console, ConsoleError, LogSink, Pattern};

/// Printed by ssh for an unknown host key.
const NEW_HOST_KEY: &str = "Are you sure you want to continue connecting";

/// Password prompt, both at login and from commands that ask for it again.
const PASSWORD_PROMPT: &str = "password:";

/// Any shell prompt.
const SHELL_PROMPT_RE: &str = "[$#]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTimeouts {
    /// Each step of the login dialogue.
    pub login: Duration,
    /// How long a command gets to ask for the password again.
    pub password_check: Duration,
    /// Pause after each command.
    pub command_pause: Duration,
    /// Total session length once the commands are running.
    pub session: Duration,
}

impl Default for RemoteTimeouts {
    fn default() -> Self {
        Self {
            login: Duration::from_secs(30),
            password_check: Duration::from_secs(3),
            command_pause: Duration::from_secs(4),
            session: Duration::from_secs(900),
        }
    }
}

/// How a remote session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The server closed the session.
    Closed,
    TimedOut,
    /// We were interrupted and logged out.
    Interrupted,
}

/// A scripted ssh session on the console server.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    login_command: String,
    password: String,
    commands: Vec<String>,
    timeouts: RemoteTimeouts,
}

impl RemoteSession {
    pub fn new(login_command: impl Into<String>, password: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            login_command: login_command.into(),
            password: password.into(),
            commands,
            timeouts: RemoteTimeouts::default(),
        }
    }

    /// Session that resets the configured board and starts `mux_command` on the server.
    pub fn for_mux(remote: &RemoteConfig, mux_command: &str) -> Self {
        Self::new(
            format!("ssh -x -l {} {}", remote.user, remote.server),
            remote.password.clone(),
            vec![format!("skermit -reset {}", remote.board), mux_command.to_string()],
        )
    }

    pub fn with_timeouts(mut self, timeouts: RemoteTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Log in: accept an unknown host key, answer the password prompt, wait for a shell prompt.
    pub async fn login(&self, console: &mut Console) -> Result<(), ConsoleError> {
        let shell = Pattern::regex(SHELL_PROMPT_RE).map_err(std::io::Error::other)?;
        let first = [Pattern::exact(NEW_HOST_KEY), Pattern::exact(PASSWORD_PROMPT), shell.clone()];
        let found = console.expect(&first, self.timeouts.login).await?;
        if found.index == 0 {
            console.send_line("yes").await?;
            console.expect_exact(PASSWORD_PROMPT, self.timeouts.login).await?;
        }
        if found.index <= 1 {
            console.send_line(&self.password).await?;
            console.expect(&[shell], self.timeouts.login).await?;
        }
        Ok(())
    }

    /// Send each command, answering a password prompt if one shows up quickly.
    pub async fn run_commands(&self, console: &mut Console) -> Result<(), ConsoleError> {
        for command in &self.commands {
            tracing::info!(command = %command, "remote command");
            console.send_line(command).await?;
            match console.expect_exact(PASSWORD_PROMPT, self.timeouts.password_check).await {
                Ok(_) => console.send_line(&self.password).await?,
                Err(e) if e.is_timeout() => {}
                Err(e) if e.is_closed() => {
                    tracing::warn!(command = %command, "console server closed the session");
                    break;
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.timeouts.command_pause).await;
        }
        Ok(())
    }

    /// Run the whole session with its transcript written to `log`.
    pub async fn run(&self, log: LogSink) -> Result<RemoteOutcome, ConsoleError> {
        let mut console = Console::spawn(&self.login_command, log)?;
        if let Err(e) = self.login(&mut console).await {
            tracing::error!(error = %e, "could not log in to the console server");
            console.close().await?;
            return Err(e);
        }
        self.run_commands(&mut console).await?;

        let ended = tokio::select! {
            result = console.wait_closed(self.timeouts.session) => match result {
                Ok(()) => RemoteOutcome::Closed,
                Err(e) if e.is_timeout() => RemoteOutcome::TimedOut,
                Err(e) => return Err(e),
            },
            _ = tokio::signal::ctrl_c() => RemoteOutcome::Interrupted,
        };
        match ended {
            RemoteOutcome::Interrupted => {
                tracing::info!("interrupted, logging out");
                console.send_line("logout").await?;
                console.close().await?;
            }
            RemoteOutcome::TimedOut => {
                println!("TIMEOUT");
                console.close().await?;
            }
            RemoteOutcome::Closed => console.close().await?,
        }
        Ok(ended)
    }
}
