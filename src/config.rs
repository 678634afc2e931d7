//! Harness configuration
//!
//! Paths, ports, remote credentials and teardown timing used by the coordinator and its children.
//! Configuration is read from a TOML file; every field has a default so a partial (or absent) file works.
//!
//! ## Lookup order
//!
//! 1. `--config <FILE>` on the command line
//! 2. `$HVHARNESS_CONFIG`
//! 3. `hvharness.toml` in the working directory, if present
//! 4. built-in defaults

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "HVHARNESS_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "hvharness.toml";

/// Errors while loading configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    #[diagnostic(code(hvharness::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    #[diagnostic(
        code(hvharness::config::parse),
        help("every key is optional; see the [paths], [remote], [mux], [simulator] and [timing] tables")
    )]
    Parse { path: PathBuf, message: String },
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    pub paths: PathsConfig,
    pub consoles: ConsoleConfig,
    pub remote: RemoteConfig,
    pub mux: MuxConfig,
    pub simulator: SimulatorConfig,
    pub timing: TimingConfig,
}

/// Filesystem layout of a campaign.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Console logs go to `<log_root>/<target>/`.
    pub log_root: PathBuf,
    /// Test binaries; the simulator runs from here.
    pub bin_path: PathBuf,
    /// Per-test directories holding simulator scripts and behavior scripts.
    pub test_root: PathBuf,
    /// Directory scanned by `report` when none is given.
    pub results_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("../../output/test32/log/"),
            bin_path: PathBuf::from("../../output/test32/"),
            test_root: PathBuf::from("../../test"),
            results_dir: PathBuf::from("."),
        }
    }
}

/// Console port layout and listener selection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Console `i` is served on `start_port + i`.
    pub start_port: u16,
    /// Attach command prefix; the `<host>:<port>` is appended.
    pub attach_command: String,
    /// Tests whose secondary consoles run a Linux login dialogue.
    pub linux_tests: Vec<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            start_port: 23400,
            attach_command: "socat -,raw,echo=0 tcp:".to_string(),
            linux_tests: vec!["linux".to_string(), "simtst".to_string()],
        }
    }
}

/// Remote console server used for hardware targets.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub server: String,
    pub user: String,
    pub password: String,
    /// Directory on the TFTP server holding per-test artifacts (relative to its root).
    pub testdir: String,
    pub board: String,
    /// Board reset command issued at the boot loader prompt.
    pub board_reset_command: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server: "ofnir.am.freescale.net".to_string(),
            user: "arailea1".to_string(),
            password: "freescale".to_string(),
            testdir: "arailea1/".to_string(),
            board: "grinch".to_string(),
            board_reset_command: "pixis_reset altbank".to_string(),
        }
    }
}

/// Console multiplexer invocation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MuxConfig {
    /// Local mux binary for simulated targets.
    pub binary: PathBuf,
    /// Simulator console endpoint the mux connects to.
    pub sim_endpoint: String,
    /// Mux binary name on the remote console server.
    pub remote_binary: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("../../tools/mux_server/mux_server"),
            sim_endpoint: "localhost:9124".to_string(),
            remote_binary: "mux_server".to_string(),
        }
    }
}

/// Simulator invocation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    pub program: String,
    /// Written to the simulator's stdin during teardown.
    pub quit_command: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            program: "simics".to_string(),
            quit_command: "quit\r".to_string(),
        }
    }
}

/// Coordinator timing, in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_secs: f64,
    /// Pause after starting the remote mux so the board can reset.
    pub hardware_settle_secs: f64,
    pub sim_interrupt_grace_secs: f64,
    pub sim_quit_grace_secs: f64,
    /// Pause between plan entries.
    pub plan_gap_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1.0,
            hardware_settle_secs: 20.0,
            sim_interrupt_grace_secs: 5.0,
            sim_quit_grace_secs: 8.0,
            plan_gap_secs: 2.0,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }

    pub fn hardware_settle(&self) -> Duration {
        secs(self.hardware_settle_secs)
    }

    pub fn sim_interrupt_grace(&self) -> Duration {
        secs(self.sim_interrupt_grace_secs)
    }

    pub fn sim_quit_grace(&self) -> Duration {
        secs(self.sim_quit_grace_secs)
    }

    pub fn plan_gap(&self) -> Duration {
        secs(self.plan_gap_secs)
    }

    /// All delays zeroed; used by tests that drive fake processes.
    pub fn immediate() -> Self {
        Self {
            poll_interval_secs: 0.0,
            hardware_settle_secs: 0.0,
            sim_interrupt_grace_secs: 0.0,
            sim_quit_grace_secs: 0.0,
            plan_gap_secs: 0.0,
        }
    }
}

/// Negative or NaN values from a hand-edited file collapse to zero instead of panicking.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl HarnessConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Resolve configuration using the documented lookup order.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(local);
        }
        tracing::debug!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Whether secondary consoles of `test_name` run the Linux dialogue.
    pub fn is_linux_test(&self, test_name: &str) -> bool {
        self.consoles.linux_tests.iter().any(|t| t == test_name)
    }

    /// Console log directory for one target.
    pub fn log_dir(&self, target: &str) -> PathBuf {
        self.paths.log_root.join(target)
    }
}
