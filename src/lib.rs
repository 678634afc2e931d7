#![deny(unsafe_code)]
//! Multi-console hypervisor test harness
//!
//! Boots a hypervisor test on a simulated or real board, watches every console of the run, decides when the run
//! is over and appends one result row per test to a per-target ledger.
//!
//! ## Layout
//!
//! - [`coordinator`]: one run, from spawning the mux and consoles to the ledger row
//! - [`listener`], [`boot`], [`remote`]: console dialogues, each run in a child copy of the harness
//! - [`console`]: the expect engine those dialogues are written on
//! - [`behavior`]: per-test console hooks (in code or TOML scripts)
//! - [`ledger`], [`logscan`], [`report`]: results on disk
//! - [`plan`], [`events`]: plan files and the simulator event feed
//!
//! Marker strings, verdict precedence and the quorum rule live in the `hvharness_core` crate.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **Unsafe**: confined to `kill(2)` in `process::signal` and the pseudo-terminal setup in `console::pty`.

pub mod behavior;
pub mod boot;
pub mod cli;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod events;
pub mod ledger;
pub mod listener;
pub mod logscan;
pub mod mux;
pub mod plan;
pub mod process;
pub mod remote;
pub mod report;
pub mod version;

pub use config::HarnessConfig;
pub use coordinator::{RunCoordinator, RunError, RunResult, TestSpec};
pub use hvharness_core::{MarkerCounts, TargetKind, Verdict};
pub use ledger::{Ledger, LedgerRow};
