//! Marker counting and verdict policy.
//!
//! A run's verdict is derived only from literal marker counts over the console logs, so the scanner here is
//! deliberately dumb: substring occurrence counting, no parsing of lines or context.

use std::fmt;
use std::ops::{Add, AddAssign};

use crate::markers::{self, MarkerId};

/// Overall verdict of one test run, as written in the ledger `Result` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Passed,
    Failed,
    Warning,
    /// Written by the plan runner for disabled tests; never produced by a scan.
    NotExecuted,
}

impl Verdict {
    /// Ledger spelling of the verdict.
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
            Verdict::Warning => "WARNING",
            Verdict::NotExecuted => "NOT_EXECUTED",
        }
    }

    /// Parse a ledger spelling.
    pub fn from_ledger(text: &str) -> Option<Self> {
        match text {
            "PASSED" => Some(Verdict::Passed),
            "FAILED" => Some(Verdict::Failed),
            "WARNING" => Some(Verdict::Warning),
            "NOT_EXECUTED" => Some(Verdict::NotExecuted),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal marker occurrence counts over one or more console transcripts.
///
/// Counts combine with `+`, so scanning logs one by one and summing equals scanning them concatenated
/// (as long as no marker straddles a file boundary).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerCounts {
    pub passed: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub connection_refused: u64,
}

impl MarkerCounts {
    /// Count non-overlapping occurrences of every result marker in `text`.
    ///
    /// ## Examples
    /// ```rust
    /// use hvharness_core::MarkerCounts;
    ///
    /// let counts = MarkerCounts::scan("hcall PASSED\nhcall PASSED\nTIMEOUT\n");
    /// assert_eq!(counts.passed, 2);
    /// assert_eq!(counts.timeouts, 1);
    /// ```
    pub fn scan(text: &str) -> Self {
        Self {
            passed: count(text, MarkerId::Passed),
            failed: count(text, MarkerId::Failed),
            timeouts: count(text, MarkerId::Timeout),
            connection_refused: count(text, MarkerId::ConnectionRefused),
        }
    }

    /// Apply verdict precedence: any `FAILED` wins, then any `TIMEOUT` or `Connection refused` is a warning.
    pub fn verdict(&self) -> Verdict {
        if self.failed > 0 {
            Verdict::Failed
        } else if self.timeouts > 0 || self.connection_refused > 0 {
            Verdict::Warning
        } else {
            Verdict::Passed
        }
    }
}

fn count(text: &str, id: MarkerId) -> u64 {
    text.matches(markers::as_str(id)).count() as u64
}

impl Add for MarkerCounts {
    type Output = MarkerCounts;

    fn add(self, rhs: MarkerCounts) -> MarkerCounts {
        MarkerCounts {
            passed: self.passed + rhs.passed,
            failed: self.failed + rhs.failed,
            timeouts: self.timeouts + rhs.timeouts,
            connection_refused: self.connection_refused + rhs.connection_refused,
        }
    }
}

impl AddAssign for MarkerCounts {
    fn add_assign(&mut self, rhs: MarkerCounts) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for MarkerCounts {
    fn sum<I: Iterator<Item = MarkerCounts>>(iter: I) -> Self {
        iter.fold(MarkerCounts::default(), Add::add)
    }
}
