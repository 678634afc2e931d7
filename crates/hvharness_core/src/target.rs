//! Target classification.
//!
//! Targets are plain platform names (`p4080ds`, `p3041ds`, `p4080ds_hw`, ...). Any name containing `hw` runs on
//! real hardware behind a remote console server; everything else is simulated.

/// How a target is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Simulated,
    Hardware,
}

impl TargetKind {
    /// Classify a target name.
    pub fn classify(target: &str) -> Self {
        if target.contains("hw") {
            TargetKind::Hardware
        } else {
            TargetKind::Simulated
        }
    }

    /// Short spelling used on listener command lines.
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Simulated => "sim",
            TargetKind::Hardware => "hw",
        }
    }

    /// Parse the short spelling.
    pub fn from_short(text: &str) -> Option<Self> {
        match text {
            "sim" => Some(TargetKind::Simulated),
            "hw" => Some(TargetKind::Hardware),
            _ => None,
        }
    }

    pub fn is_hardware(self) -> bool {
        self == TargetKind::Hardware
    }
}
