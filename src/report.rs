//! Cross-target result report
//!
//! Merges every ledger in a directory into one table: a row per test, a column per target. A target is named
//! after its ledger file (`p4080ds_results.txt` is target `p4080ds`).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::ledger::{self, Ledger, LedgerError, LedgerRow};

const NAME_WIDTH: usize = 30;
const CELL_WIDTH: usize = 20;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("cannot list results directory {dir}: {source}")]
    Scan {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("cannot encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ledger files in `dir`, sorted by file name.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let scan_error = |source| ReportError::Scan {
        dir: dir.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(scan_error)? {
        let path = entry.map_err(scan_error)?.path();
        if path.is_file() && ledger::target_of(&path).is_some() {
            found.push(path);
        }
    }
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(found)
}

/// Results pivoted by test name and target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultTable {
    targets: Vec<String>,
    tests: BTreeMap<String, BTreeMap<String, String>>,
}

impl ResultTable {
    /// Load every ledger found in `dir`.
    pub fn load(dir: &Path) -> Result<Self, ReportError> {
        let mut table = Self::default();
        for path in discover(dir)? {
            let Some(target) = ledger::target_of(&path) else {
                continue;
            };
            let rows = Ledger::at(&path).read_rows()?;
            tracing::debug!(target, rows = rows.len(), "loaded ledger");
            table.add_target(target, &rows);
        }
        Ok(table)
    }

    /// Add a target column. Later rows for the same test overwrite earlier ones.
    pub fn add_target(&mut self, target: &str, rows: &[LedgerRow]) {
        self.targets.push(target.to_string());
        for row in rows {
            self.tests
                .entry(row.test_name.clone())
                .or_default()
                .insert(target.to_string(), row.result.clone());
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Result of `test` on `target`, if recorded.
    pub fn cell(&self, test: &str, target: &str) -> Option<&str> {
        self.tests.get(test)?.get(target).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Fixed-width text table.
    pub fn render_text(&self) -> String {
        let mut title = format!("{:<NAME_WIDTH$}", "Test Name");
        for target in &self.targets {
            let _ = write!(title, "{target:<CELL_WIDTH$}");
        }
        let mut out = String::new();
        let _ = writeln!(out, "{title}");
        let _ = writeln!(out, "{}", "=".repeat(title.len()));
        for (test, results) in &self.tests {
            let cells: String = self
                .targets
                .iter()
                .map(|t| format!("{:<CELL_WIDTH$}", results.get(t).map_or("", String::as_str)))
                .collect();
            let _ = writeln!(out, "{test:<NAME_WIDTH$} {cells}");
        }
        out
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
