//! Console log scanning.

use std::path::Path;

use hvharness_core::MarkerCounts;

/// Count result markers in one console log.
///
/// Logs are read lossily since consoles print whatever the guest sends. A missing or unreadable log counts as
/// empty: its console never produced output, which the quorum and the other markers already account for.
pub fn scan_log(path: &Path) -> MarkerCounts {
    match std::fs::read(path) {
        Ok(bytes) => MarkerCounts::scan(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            tracing::warn!(log = %path.display(), error = %e, "console log unreadable, counting it as empty");
            MarkerCounts::default()
        }
    }
}

/// Sum the marker counts of several logs.
pub fn scan_logs<P: AsRef<Path>>(paths: &[P]) -> MarkerCounts {
    paths.iter().map(|p| scan_log(p.as_ref())).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvharness_core::Verdict;

    #[test]
    fn test_counts_sum_over_logs() {
        let dir = tempfile::tempdir().unwrap();
        let con0 = dir.path().join("t-con0.log");
        let con1 = dir.path().join("t-con1.log");
        std::fs::write(&con0, "Freescale Hypervisor\nhcall PASSED\nhcall PASSED\n").unwrap();
        std::fs::write(&con1, "booting\n\nTIMEOUT\n").unwrap();

        let counts = scan_logs(&[&con0, &con1]);
        assert_eq!(counts.passed, 2);
        assert_eq!(counts.timeouts, 1);
        assert_eq!(counts.verdict(), Verdict::Warning);
    }

    #[test]
    fn test_missing_log_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scan_log(&dir.path().join("absent.log")), MarkerCounts::default());
    }

    #[test]
    fn test_invalid_utf8_is_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("con.log");
        std::fs::write(&log, b"\xff\xfe garbage FAILED\n").unwrap();
        assert_eq!(scan_log(&log).failed, 1);
    }
}
