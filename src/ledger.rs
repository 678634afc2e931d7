//! Results ledger
//!
//! One CSV file per campaign and target (`<target>_results.txt`), appended to by the run coordinator and the
//! plan runner, read by the report aggregator. The layout is fixed:
//!
//! ```text
//! Test Name,Result,Passes,Fails,Timeouts
//! hcalls-1p,PASSED,12,0,0
//! linux-e1000,NOT_EXECUTED,,,
//! ```
//!
//! Appends open the file in append mode and write a single record, so a ledger is never rewritten.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use hvharness_core::{MarkerCounts, Verdict};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger header record.
pub const HEADER: [&str; 5] = ["Test Name", "Result", "Passes", "Fails", "Timeouts"];

/// Suffix of ledger file names; the prefix is the target.
pub const LEDGER_SUFFIX: &str = "_results.txt";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot open ledger {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cannot read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One ledger record.
///
/// Counts are empty for tests that did not run. Unreadable counts are read back as empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    #[serde(rename = "Test Name")]
    pub test_name: String,
    #[serde(rename = "Result")]
    pub result: String,
    #[serde(rename = "Passes", default, deserialize_with = "csv::invalid_option")]
    pub passes: Option<u64>,
    #[serde(rename = "Fails", default, deserialize_with = "csv::invalid_option")]
    pub fails: Option<u64>,
    #[serde(rename = "Timeouts", default, deserialize_with = "csv::invalid_option")]
    pub timeouts: Option<u64>,
}

impl LedgerRow {
    /// Row for a completed run.
    pub fn executed(test_name: impl Into<String>, counts: &MarkerCounts) -> Self {
        Self {
            test_name: test_name.into(),
            result: counts.verdict().as_str().to_string(),
            passes: Some(counts.passed),
            fails: Some(counts.failed),
            timeouts: Some(counts.timeouts),
        }
    }

    /// Row for a disabled plan entry.
    pub fn not_executed(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            result: Verdict::NotExecuted.as_str().to_string(),
            passes: None,
            fails: None,
            timeouts: None,
        }
    }

    /// Parsed `Result` column; `None` for spellings this version does not know.
    pub fn verdict(&self) -> Option<Verdict> {
        Verdict::from_ledger(&self.result)
    }
}

/// Ledger path for a target inside `dir`.
pub fn ledger_path(dir: &Path, target: &str) -> PathBuf {
    dir.join(format!("{target}{LEDGER_SUFFIX}"))
}

/// Target encoded in a ledger file name, if it is one.
pub fn target_of(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .strip_suffix(LEDGER_SUFFIX)
        .filter(|target| !target.is_empty())
}

/// Handle on a ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Refer to an existing (or not yet existing) ledger without touching it.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create or truncate the ledger and write the header.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self::at(path);
        let file = File::create(&ledger.path).map_err(|source| ledger.open_error(source))?;
        ledger.write_header(file)?;
        Ok(ledger)
    }

    /// Open a ledger for appending, writing the header first if the file is new or empty.
    pub fn open_append(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self::at(path);
        let is_empty = std::fs::metadata(&ledger.path).map(|m| m.len() == 0).unwrap_or(true);
        if is_empty {
            let file = ledger.append_handle()?;
            ledger.write_header(file)?;
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn append(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let file = self.append_handle()?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(row).map_err(|source| self.write_error(source))?;
        writer.flush().map_err(|source| self.write_error(source.into()))?;
        tracing::debug!(ledger = %self.path.display(), test = %row.test_name, result = %row.result, "ledger row");
        Ok(())
    }

    /// Append a `NOT_EXECUTED` record for a disabled test.
    pub fn append_not_executed(&self, test_name: &str) -> Result<(), LedgerError> {
        self.append(&LedgerRow::not_executed(test_name))
    }

    /// Read every record. Rows with extra or missing columns are tolerated; rows without a test name or result
    /// are skipped with a warning.
    pub fn read_rows(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|source| self.read_error(source))?;
        let mut rows = Vec::new();
        for (index, record) in reader.deserialize::<LedgerRow>().enumerate() {
            match record {
                Ok(row) => rows.push(row),
                Err(source) if source.is_io_error() => return Err(self.read_error(source)),
                Err(e) => tracing::warn!(
                    ledger = %self.path.display(),
                    row = index + 1,
                    error = %e,
                    "skipping unreadable ledger row"
                ),
            }
        }
        Ok(rows)
    }

    fn append_handle(&self) -> Result<File, LedgerError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.open_error(source))
    }

    fn write_header(&self, file: File) -> Result<(), LedgerError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(HEADER).map_err(|source| self.write_error(source))?;
        writer.flush().map_err(|source| self.write_error(source.into()))
    }

    fn open_error(&self, source: io::Error) -> LedgerError {
        LedgerError::Open {
            path: self.path.clone(),
            source,
        }
    }

    fn read_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Read {
            path: self.path.clone(),
            source,
        }
    }

    fn write_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
