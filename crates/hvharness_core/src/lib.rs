//! Provide shared, pure policy and canonical console vocabulary for the hvharness coordinator and listeners.
//!
//! This crate is intentionally small and dependency-free. It contains deterministic helpers that both:
//! - the run coordinator uses to decide when a run is complete and what verdict it gets, and
//! - the console listeners use to know which strings to wait for and which markers to write.
//!
//! ## Notes
//!
//! - This is a “policy core” crate: **no IO**, no global state, no process handling.
//! - Current scope: console marker registry, marker counting and verdict precedence, quorum tracking and
//!   target classification.

pub mod markers;
pub mod outcome;
pub mod quorum;
pub mod target;

pub use markers::MarkerId;
pub use outcome::{MarkerCounts, Verdict};
pub use quorum::{QuorumProgress, QuorumTracker};
pub use target::TargetKind;
