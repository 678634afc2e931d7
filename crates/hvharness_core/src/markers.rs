//! Console marker vocabulary registry.
//!
//! Two kinds of strings live here:
//! - **result markers**, the literal substrings counted in console logs after a run, and
//! - **console patterns**, the prompts and banners listeners wait for on a live console.
//!
//! Keeping both in one place means the writer of a marker (a listener appending `TIMEOUT`) and its reader (the
//! log scanner) cannot drift apart.

/// Stable identifier for the result markers counted in console logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerId {
    Failed,
    Passed,
    Timeout,
    ConnectionRefused,
}

/// Metadata entry for a result marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerInfo {
    pub id: MarkerId,
    /// Literal text searched for in logs (case-sensitive, substring match).
    pub text: &'static str,
    pub description: &'static str,
}

/// Registry of result markers, in ledger column order.
pub const RESULT_MARKERS: &[MarkerInfo] = &[
    MarkerInfo {
        id: MarkerId::Failed,
        text: "FAILED",
        description: "A guest test reported a failed check.",
    },
    MarkerInfo {
        id: MarkerId::Passed,
        text: "PASSED",
        description: "A guest test reported a passed check.",
    },
    MarkerInfo {
        id: MarkerId::Timeout,
        text: "TIMEOUT",
        description: "A listener gave up waiting for an expected console pattern.",
    },
    MarkerInfo {
        id: MarkerId::ConnectionRefused,
        text: "Connection refused",
        description: "The console attach command could not reach the multiplexer.",
    },
];

/// Resolve marker text to its stable id.
pub fn from_str(text: &str) -> Option<MarkerId> {
    RESULT_MARKERS.iter().find(|m| m.text == text).map(|m| m.id)
}

/// Return the literal text for a marker.
pub fn as_str(id: MarkerId) -> &'static str {
    info_for(id).text
}

/// Return registry metadata for a marker.
pub fn info_for(id: MarkerId) -> &'static MarkerInfo {
    match id {
        MarkerId::Failed => &RESULT_MARKERS[0],
        MarkerId::Passed => &RESULT_MARKERS[1],
        MarkerId::Timeout => &RESULT_MARKERS[2],
        MarkerId::ConnectionRefused => &RESULT_MARKERS[3],
    }
}

// ---------------------------------------------------------------------
// Diagnostic lines written by listeners
// ---------------------------------------------------------------------

/// Appended to a console log when an expected pattern did not show up in time.
pub const TIMEOUT_LOG_LINE: &str = "\nTIMEOUT\n";

/// Appended to a console log when the attached stream ended early. Deliberately not a result marker.
pub const STREAM_CLOSED_LOG_LINE: &str = "\nCONSOLE CLOSED\n";

// ---------------------------------------------------------------------
// Partition console patterns
// ---------------------------------------------------------------------

/// Printed by bare-metal partition tests when they are done.
pub const TEST_COMPLETE: &str = "Test Complete";

/// Linux console login prompt.
pub const LOGIN_PROMPT: &str = "login:";

/// Printed by the LWE hello partition.
pub const LWE_HELLO: &str = "Hello World! My LWE-id";

/// Printed by the reset-status partition test.
pub const RESET_STATUS_TEST: &str = "Reset status test";

/// Reset-status partition stopped by the manager.
pub const STOPPED_BY_MANAGER: &str = "stopped by property:  manager";

/// Reset-status partition stopped from the hypervisor shell.
pub const STOPPED_BY_SHELL: &str = "stopped by property:  shell";

/// Root shell prompt after login (regular expression).
pub const ROOT_PROMPT_RE: &str = "root@.*:~# *";

/// Login user sent at the Linux login prompt.
pub const LOGIN_USER: &str = "root";

/// Command used to confirm the Linux shell is alive.
pub const SHELL_PROBE: &str = "uname";

/// Expected answer to [`SHELL_PROBE`].
pub const SHELL_PROBE_REPLY: &str = "Linux";

// ---------------------------------------------------------------------
// Boot console patterns
// ---------------------------------------------------------------------

/// Boot loader prompt on hardware targets.
pub const BOOTLOADER_PROMPT: &str = "=> ";

/// Hypervisor banner printed once it starts.
pub const HYPERVISOR_BANNER: &str = "Freescale Hypervisor";

/// Hypervisor shell prompt.
pub const HV_PROMPT: &str = "HV>";

/// Printed when the hypervisor hands a partition over to the reset-status guest.
pub const HANDOFF_MARKER: &str = "branching to guest reset-status";

/// Patterns watched by the boot supervisor loop, in match-priority order.
///
/// Only [`HANDOFF_MARKER`] triggers an action; the others keep the loop alive.
pub const BOOT_WATCH_PATTERNS: &[&str] = &[HV_PROMPT, "Error", "error", "Warning", "warning", HANDOFF_MARKER];
