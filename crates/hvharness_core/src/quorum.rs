//! Quorum tracking for multi-console runs.
//!
//! The coordinator polls every console once per tick and feeds the observed exit codes (`None` while a console
//! is still running) into [`QuorumTracker::observe`]. A run is complete as soon as either enough consoles have
//! exited with status 0 or every console has exited. Both conditions are evaluated on the same tick's counts;
//! neither takes priority. A quorum of zero (or a run without consoles) is complete on the first tick.

/// Counts observed on one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumProgress {
    /// Consoles that have exited, whatever their status.
    pub finished: usize,
    /// Consoles that have exited with status 0.
    pub required_finished: usize,
    /// Whether the run should stop waiting.
    pub complete: bool,
}

/// Completion rule for `console_count` consoles of which `required` must succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumTracker {
    console_count: usize,
    required: usize,
}

impl QuorumTracker {
    /// Build a tracker.
    ///
    /// ## Returns
    /// - `None` when `required` exceeds `console_count`; such a quorum could never be reached.
    pub fn new(console_count: usize, required: usize) -> Option<Self> {
        if required > console_count {
            return None;
        }
        Some(Self { console_count, required })
    }

    pub fn console_count(&self) -> usize {
        self.console_count
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Evaluate one tick of exit codes.
    ///
    /// ## Parameters
    /// - `exit_codes`: one entry per console, `Some(code)` once that console has exited.
    ///
    /// ## Notes
    /// - The required count is compared with `>=` so that several consoles succeeding on the same tick still
    ///   complete the run.
    pub fn observe(&self, exit_codes: &[Option<i32>]) -> QuorumProgress {
        let finished = exit_codes.iter().filter(|c| c.is_some()).count();
        let required_finished = exit_codes.iter().filter(|c| **c == Some(0)).count();
        QuorumProgress {
            finished,
            required_finished,
            complete: required_finished >= self.required || finished >= self.console_count,
        }
    }
}
