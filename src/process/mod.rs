//! Child process boundary for the run coordinator
//!
//! The coordinator never touches `std::process` directly. It describes what to start with a [`ProcessSpec`],
//! asks a [`ProcessLauncher`] to start it, and drives the result through the [`Supervised`] trait. This keeps
//! the polling and teardown logic testable with scripted fake processes.
//!
//! [`OsLauncher`] is the real implementation.

pub mod signal;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use signal::Signal;

/// Which part of a run a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Multiplexer,
    Simulator,
    Console(usize),
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Multiplexer => write!(f, "mux"),
            ProcessRole::Simulator => write!(f, "simulator"),
            ProcessRole::Console(i) => write!(f, "console {i}"),
        }
    }
}

/// Description of a process to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// File receiving stdout and stderr; `None` discards output.
    pub output: Option<PathBuf>,
    /// Keep a pipe to stdin for [`Supervised::write_input`].
    pub stdin_piped: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            output: None,
            stdin_piped: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn output_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn with_stdin(mut self) -> Self {
        self.stdin_piped = true;
        self
    }

    /// Shell-like rendering for logs.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| {
            if a.contains(char::is_whitespace) {
                format!("{a:?}")
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }
}

/// How the harness starts another copy of itself as a child (listeners, boot supervisor, remote helper).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfInvocation {
    pub exe: PathBuf,
    /// Config file forwarded to children with `--config`.
    pub config: Option<PathBuf>,
}

impl SelfInvocation {
    pub fn new(exe: impl Into<PathBuf>, config: Option<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            config,
        }
    }

    /// The running executable, forwarding `config`.
    pub fn current(config: Option<PathBuf>) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, config))
    }

    /// Spec running `subcommand` with `args` in a child copy of the harness.
    pub fn spec<I, S>(&self, subcommand: &str, args: I) -> ProcessSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = ProcessSpec::new(&self.exe);
        if let Some(config) = &self.config {
            spec = spec.arg("--config").arg(config.display().to_string());
        }
        spec.arg(subcommand).args(args)
    }
}

/// A started child process, as seen by the coordinator.
pub trait Supervised: Send {
    /// Non-blocking exit check. Death by signal is reported as `-1`.
    fn try_exit_code(&mut self) -> io::Result<Option<i32>>;

    fn interrupt(&mut self) -> io::Result<()>;

    fn terminate(&mut self) -> io::Result<()>;

    /// Write to the child's stdin, if it was started with one.
    fn write_input(&mut self, text: &str) -> io::Result<()>;
}

/// Starts processes for the coordinator.
pub trait ProcessLauncher {
    fn launch(&mut self, role: ProcessRole, spec: &ProcessSpec) -> io::Result<Box<dyn Supervised>>;
}

/// Launcher backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    fn launch(&mut self, role: ProcessRole, spec: &ProcessSpec) -> io::Result<Box<dyn Supervised>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        match &spec.output {
            Some(path) => {
                let out = create_output(path)?;
                let err = out.try_clone()?;
                cmd.stdout(out).stderr(err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        cmd.stdin(if spec.stdin_piped { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd.spawn()?;
        tracing::info!(%role, pid = child.id(), command = %spec.display_command(), "started");
        let stdin = child.stdin.take();
        Ok(Box::new(OsProcess { child, stdin, exit: None }))
    }
}

fn create_output(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).write(true).truncate(true).open(path)
}

/// A real child process.
pub struct OsProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    exit: Option<i32>,
}

impl OsProcess {
    fn signal(&mut self, signal: Signal) -> io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::send(self.child.id(), signal)
    }
}

impl Supervised for OsProcess {
    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?.map(|status| status.code().unwrap_or(-1));
        }
        Ok(self.exit)
    }

    fn interrupt(&mut self) -> io::Result<()> {
        self.signal(Signal::Interrupt)
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.signal(Signal::Terminate)
    }

    fn write_input(&mut self, text: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "process has no stdin pipe"))?;
        stdin.write_all(text.as_bytes())?;
        stdin.flush()
    }
}
