//! Property-based tests for the harness
//!
//! These tests use proptest to check the quorum rule, log scanning and the
//! plan parser across many generated inputs.

use hvharness::coordinator::full_name;
use hvharness::logscan;
use hvharness::plan::parse_plan;
use hvharness_core::{MarkerCounts, QuorumTracker, Verdict};
use proptest::prelude::*;

// =============================================================================
// Quorum Properties
// =============================================================================

/// Exit codes for `count` consoles; `None` is still running.
fn exit_codes(count: usize) -> impl Strategy<Value = Vec<Option<i32>>> {
    prop::collection::vec(prop::option::of(-1i32..6), count)
}

fn quorum_case() -> impl Strategy<Value = (usize, usize, Vec<Option<i32>>)> {
    (0usize..8).prop_flat_map(|count| (Just(count), 0..=count, exit_codes(count)))
}

proptest! {
    /// Property: the run completes exactly when enough consoles succeeded or all of them exited
    #[test]
    fn quorum_completion_rule((count, required, codes) in quorum_case()) {
        let tracker = QuorumTracker::new(count, required).unwrap();
        let progress = tracker.observe(&codes);
        let succeeded = codes.iter().filter(|c| **c == Some(0)).count();
        let exited = codes.iter().filter(|c| c.is_some()).count();
        prop_assert_eq!(progress.required_finished, succeeded);
        prop_assert_eq!(progress.finished, exited);
        prop_assert_eq!(progress.complete, succeeded >= required || exited == count);
    }

    /// Property: once complete, more consoles exiting never un-completes the run
    #[test]
    fn quorum_completion_is_monotonic((count, required, codes) in quorum_case(), late in -1i32..3) {
        let tracker = QuorumTracker::new(count, required).unwrap();
        let before = tracker.observe(&codes);
        let mut after = codes.clone();
        if let Some(running) = after.iter_mut().find(|c| c.is_none()) {
            *running = Some(late);
        }
        let later = tracker.observe(&after);
        prop_assert!(later.finished >= before.finished);
        prop_assert!(!before.complete || later.complete);
    }

    /// Property: every console exiting always ends the run
    #[test]
    fn all_exited_completes((count, required, codes) in quorum_case(), late in -1i32..3) {
        let tracker = QuorumTracker::new(count, required).unwrap();
        let exited: Vec<Option<i32>> = codes.iter().map(|c| c.or(Some(late))).collect();
        prop_assert!(tracker.observe(&exited).complete);
    }

    /// Property: a quorum larger than the console count is rejected
    #[test]
    fn quorum_rejects_required_above_count(count in 0usize..8, extra in 1usize..4) {
        prop_assert!(QuorumTracker::new(count, count + extra).is_none());
    }
}

// =============================================================================
// Log Scanning Properties
// =============================================================================

fn log_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("hcall PASSED".to_string()),
        Just("mmu FAILED".to_string()),
        Just("TIMEOUT".to_string()),
        Just("ssh: connect: Connection refused".to_string()),
        "[a-z ]{0,20}",
    ]
}

fn log_text() -> impl Strategy<Value = String> {
    prop::collection::vec(log_line(), 0..20).prop_map(|lines| lines.join("\n") + "\n")
}

proptest! {
    /// Property: scanning disjoint logs adds up
    #[test]
    fn scanning_is_additive(a in log_text(), b in log_text()) {
        let dir = tempfile::tempdir().unwrap();
        let (pa, pb) = (dir.path().join("a.log"), dir.path().join("b.log"));
        std::fs::write(&pa, &a).unwrap();
        std::fs::write(&pb, &b).unwrap();

        let both = logscan::scan_logs(&[&pa, &pb]);
        prop_assert_eq!(both, MarkerCounts::scan(&a) + MarkerCounts::scan(&b));
        // Scanning does not consume or alter the logs.
        prop_assert_eq!(logscan::scan_logs(&[&pa, &pb]), both);
    }

    /// Property: FAILED beats TIMEOUT and Connection refused, which beat PASSED
    #[test]
    fn verdict_precedence(text in log_text()) {
        let counts = MarkerCounts::scan(&text);
        let expected = if text.contains("FAILED") {
            Verdict::Failed
        } else if text.contains("TIMEOUT") || text.contains("Connection refused") {
            Verdict::Warning
        } else {
            Verdict::Passed
        };
        prop_assert_eq!(counts.verdict(), expected);
    }
}

// =============================================================================
// Plan Parser Properties
// =============================================================================

proptest! {
    /// Property: well-formed lines survive comments and padding
    #[test]
    fn plan_lines_round_trip(
        name in "[a-z][a-z0-9_]{0,10}",
        subtest in "none|[a-z0-9]{1,6}",
        count in 1usize..6,
        required in 1usize..6,
        enabled in any::<bool>(),
        comment in "[ a-z,]{0,12}",
    ) {
        let state = if enabled { "enabled" } else { "disabled" };
        let text = format!("# header\n {name} , {subtest},{count},{required} ,{state} # {comment}\n");
        let entries = parse_plan(&text, "generated").unwrap();
        prop_assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        prop_assert_eq!(&entry.name, &name);
        prop_assert_eq!(entry.console_count, count);
        prop_assert_eq!(entry.required_console_count, required);
        prop_assert_eq!(entry.enabled, enabled);
        prop_assert_eq!(entry.full_name(), full_name(&name, &subtest));
        prop_assert_eq!(entry.line, 2);
    }
}
