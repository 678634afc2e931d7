//! Simulator event feed and execution statistics
//!
//! A simulator plugin can record what the simulated CPUs did as JSON lines, one [`SimEvent`] per line:
//!
//! ```text
//! {"time": 1200, "cpu": "cpu0", "kind": "exception", "code": 14, "name": "Data TLB Miss"}
//! {"time": 1300, "cpu": "cpu0", "kind": "mode_change", "old": "hypervisor", "new": "supervisor", "steps": 52100}
//! {"time": 1400, "cpu": "cpu1", "kind": "markpoint", "id": 3, "cycles": 99000}
//! ```
//!
//! [`ExecutionStats`] folds a feed into per-CPU exception counts and per-mode instruction counts.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("cannot read event feed {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("event feed line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Processor privilege mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuMode {
    User,
    Supervisor,
    Hypervisor,
}

impl CpuMode {
    pub const ALL: [CpuMode; 3] = [CpuMode::User, CpuMode::Supervisor, CpuMode::Hypervisor];

    fn label(self) -> &'static str {
        match self {
            CpuMode::User => "User mode inst cnt",
            CpuMode::Supervisor => "Supervisor mode inst cnt",
            CpuMode::Hypervisor => "Hypervisor mode inst cnt",
        }
    }
}

/// One simulator event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimEvent {
    #[serde(default)]
    pub time: u64,
    pub cpu: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Exception { code: u32, name: String },
    ModeChange { old: CpuMode, new: CpuMode, steps: u64 },
    Markpoint { id: u32, cycles: u64 },
}

/// Parse a JSON-lines feed. Blank lines are skipped.
pub fn parse_feed(reader: impl BufRead) -> Result<Vec<SimEvent>, EventError> {
    let mut events = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| EventError::Parse {
            line: i + 1,
            source: serde_json::Error::io(e),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| EventError::Parse { line: i + 1, source })?;
        events.push(event);
    }
    Ok(events)
}

/// Read and parse a feed file.
pub fn read_feed(path: &Path) -> Result<Vec<SimEvent>, EventError> {
    let file = File::open(path).map_err(|source| EventError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_feed(BufReader::new(file))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExceptionCount {
    name: String,
    count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CpuStats {
    exceptions: BTreeMap<u32, ExceptionCount>,
    /// Instruction counts per mode; `None` until the first mode change is seen.
    modes: Option<[u64; 3]>,
    step_baseline: u64,
}

fn mode_slot(mode: CpuMode) -> usize {
    match mode {
        CpuMode::User => 0,
        CpuMode::Supervisor => 1,
        CpuMode::Hypervisor => 2,
    }
}

/// Exception and mode statistics over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    cpus: BTreeMap<String, CpuStats>,
    markpoints: Vec<(u32, u64)>,
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a SimEvent>) -> Self {
        let mut stats = Self::new();
        for event in events {
            stats.record(event);
        }
        stats
    }

    pub fn record(&mut self, event: &SimEvent) {
        match &event.kind {
            EventKind::Exception { code, name } => {
                let cpu = self.cpus.entry(event.cpu.clone()).or_default();
                cpu.exceptions
                    .entry(*code)
                    .or_insert_with(|| ExceptionCount {
                        name: name.clone(),
                        count: 0,
                    })
                    .count += 1;
            }
            EventKind::ModeChange { old, steps, .. } => {
                let cpu = self.cpus.entry(event.cpu.clone()).or_default();
                match &mut cpu.modes {
                    None => cpu.modes = Some([0; 3]),
                    Some(modes) => modes[mode_slot(*old)] += steps.saturating_sub(cpu.step_baseline),
                }
                cpu.step_baseline = *steps;
            }
            EventKind::Markpoint { id, cycles } => self.markpoints.push((*id, *cycles)),
        }
    }

    /// Zero every counter; CPUs stay known and keep their step baselines.
    pub fn reset(&mut self) {
        for cpu in self.cpus.values_mut() {
            for exception in cpu.exceptions.values_mut() {
                exception.count = 0;
            }
            if let Some(modes) = &mut cpu.modes {
                *modes = [0; 3];
            }
        }
        self.markpoints.clear();
    }

    pub fn cpus(&self) -> impl Iterator<Item = &str> {
        self.cpus.keys().map(String::as_str)
    }

    /// Count of exception `code` on `cpu`.
    pub fn exception_count(&self, cpu: &str, code: u32) -> u64 {
        self.cpus
            .get(cpu)
            .and_then(|c| c.exceptions.get(&code))
            .map_or(0, |e| e.count)
    }

    pub fn total_exceptions(&self) -> u64 {
        self.cpus.values().flat_map(|c| c.exceptions.values()).map(|e| e.count).sum()
    }

    /// Instructions executed by `cpu` in `mode`.
    pub fn mode_count(&self, cpu: &str, mode: CpuMode) -> u64 {
        self.cpus
            .get(cpu)
            .and_then(|c| c.modes)
            .map_or(0, |modes| modes[mode_slot(mode)])
    }

    pub fn markpoints(&self) -> &[(u32, u64)] {
        &self.markpoints
    }

    /// Human-readable report, one block per CPU.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, cpu) in &self.cpus {
            let _ = writeln!(out, "{name}");
            for exception in cpu.exceptions.values() {
                let _ = writeln!(out, "\t{:>30}: {}", exception.name, exception.count);
            }
            for mode in CpuMode::ALL {
                let _ = writeln!(out, "\t{:>30}: {}", mode.label(), self.mode_count(name, mode));
            }
        }
        if !self.markpoints.is_empty() {
            out.push_str("markpoints\n");
        }
        for (id, cycles) in &self.markpoints {
            let _ = writeln!(out, "\t{:>30}: {}", format!("markpoint {id}"), cycles);
        }
        out
    }
}
