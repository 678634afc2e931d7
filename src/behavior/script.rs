//! Declarative behavior scripts
//!
//! A script is a TOML file with two optional step lists, `primary` and `secondary`, one per hook:
//!
//! ```toml
//! [[secondary]]
//! send_line = "partman status"
//! [[secondary]]
//! expect = "-lwe"
//! [[secondary]]
//! read_fields = ["handle", "state"]
//! [[secondary]]
//! send_line = "partman start -h {handle} -f //opt//lwe_apps//hello//hello.elf"
//! ```
//!
//! ## Steps
//!
//! - `expect = "<text>"`, optional `regex = true`, optional `timeout = <secs>` (default 10)
//! - `send = "<text>"` - raw text, `{var}` placeholders are substituted
//! - `send_line = "<text>"` - as `send`, followed by a carriage return
//! - `sleep = <secs>`
//! - `read_fields = ["a", "b"]` - read the rest of the current line and bind its whitespace-separated fields

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use super::Behavior;
use crate::console::{Console, ConsoleError, LINE_END, Pattern};

/// Timeout for `expect` and `read_fields` steps that do not set one.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Status returned when a `read_fields` line has fewer fields than names.
pub const MISSING_FIELDS_STATUS: i32 = 1;

/// Errors while loading a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script: {0}")]
    Parse(String),

    #[error("step {step} of `{hook}`: invalid regex: {source}")]
    Regex {
        hook: &'static str,
        step: usize,
        #[source]
        source: regex::Error,
    },

    #[error("step {step} of `{hook}`: invalid duration {value}")]
    Duration { hook: &'static str, step: usize, value: f64 },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptFile {
    #[serde(default)]
    primary: Vec<StepDef>,
    #[serde(default)]
    secondary: Vec<StepDef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepDef {
    Expect {
        expect: String,
        #[serde(default)]
        regex: bool,
        timeout: Option<f64>,
    },
    Send {
        send: String,
    },
    SendLine {
        send_line: String,
    },
    Sleep {
        sleep: f64,
    },
    ReadFields {
        read_fields: Vec<String>,
        timeout: Option<f64>,
    },
}

/// A compiled script step.
#[derive(Debug, Clone)]
pub enum Step {
    Expect { pattern: Pattern, timeout: Duration },
    Send(String),
    Sleep(Duration),
    ReadFields { names: Vec<String>, timeout: Duration },
}

/// Behavior driven by a script file.
#[derive(Debug, Clone, Default)]
pub struct ScriptBehavior {
    primary: Vec<Step>,
    secondary: Vec<Step>,
}

impl ScriptBehavior {
    pub fn from_file(path: &Path) -> Result<Self, ScriptError> {
        let text = fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ScriptError> {
        let file: ScriptFile = toml::from_str(text).map_err(|e| ScriptError::Parse(e.message().to_string()))?;
        Ok(Self {
            primary: compile("primary", file.primary)?,
            secondary: compile("secondary", file.secondary)?,
        })
    }

    pub fn primary_steps(&self) -> &[Step] {
        &self.primary
    }

    pub fn secondary_steps(&self) -> &[Step] {
        &self.secondary
    }
}

fn compile(hook: &'static str, defs: Vec<StepDef>) -> Result<Vec<Step>, ScriptError> {
    defs.into_iter()
        .enumerate()
        .map(|(i, def)| compile_step(hook, i + 1, def))
        .collect()
}

fn compile_step(hook: &'static str, step: usize, def: StepDef) -> Result<Step, ScriptError> {
    let duration = |value: Option<f64>| match value {
        None => Ok(DEFAULT_STEP_TIMEOUT),
        Some(v) => Duration::try_from_secs_f64(v).map_err(|_| ScriptError::Duration { hook, step, value: v }),
    };
    Ok(match def {
        StepDef::Expect { expect, regex, timeout } => {
            let pattern = if regex {
                Pattern::regex(&expect).map_err(|source| ScriptError::Regex { hook, step, source })?
            } else {
                Pattern::exact(expect)
            };
            Step::Expect {
                pattern,
                timeout: duration(timeout)?,
            }
        }
        StepDef::Send { send } => Step::Send(send),
        StepDef::SendLine { send_line } => Step::Send(format!("{send_line}{LINE_END}")),
        StepDef::Sleep { sleep } => Step::Sleep(duration(Some(sleep))?),
        StepDef::ReadFields { read_fields, timeout } => Step::ReadFields {
            names: read_fields,
            timeout: duration(timeout)?,
        },
    })
}

/// Replace `{name}` placeholders with captured values. Unknown placeholders are left as-is.
fn interpolate(text: &str, vars: &HashMap<String, String>) -> String {
    vars.iter()
        .fold(text.to_string(), |acc, (name, value)| acc.replace(&format!("{{{name}}}"), value))
}

/// Run steps in order. Console errors abort the hook; the status is 0 unless a step reports otherwise.
async fn run_steps(steps: &[Step], console: &mut Console) -> Result<i32, ConsoleError> {
    let mut vars: HashMap<String, String> = HashMap::new();
    for step in steps {
        match step {
            Step::Expect { pattern, timeout } => {
                console.expect(std::slice::from_ref(pattern), *timeout).await?;
            }
            Step::Send(text) => console.send(&interpolate(text, &vars)).await?,
            Step::Sleep(duration) => tokio::time::sleep(*duration).await,
            Step::ReadFields { names, timeout } => {
                let line = console.read_line(*timeout).await?;
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < names.len() {
                    tracing::warn!(line = %line, expected = names.len(), "script read fewer fields than expected");
                    return Ok(MISSING_FIELDS_STATUS);
                }
                for (name, value) in names.iter().zip(fields) {
                    vars.insert(name.clone(), value.to_string());
                }
            }
        }
    }
    Ok(0)
}

#[async_trait]
impl Behavior for ScriptBehavior {
    async fn on_primary_handoff(&mut self, console: &mut Console) -> Result<i32, ConsoleError> {
        run_steps(&self.primary, console).await
    }

    async fn on_secondary_ready(&mut self, console: &mut Console) -> Result<i32, ConsoleError> {
        run_steps(&self.secondary, console).await
    }
}
