//! Per-test console behaviors
//!
//! Some tests need to drive a console after the generic listener logic has done its part: restart a partition
//! from the hypervisor shell, configure a network interface in Linux, start an LWE application, and so on.
//! These hooks are expressed through the [`Behavior`] capability trait.
//!
//! ## Hooks
//!
//! - [`Behavior::on_primary_handoff`] - console 0, after the hypervisor printed the handoff marker
//! - [`Behavior::on_secondary_ready`] - a Linux console, after login and a shell probe succeeded
//!
//! Both default to a no-op returning status 0.
//!
//! ## Resolution
//!
//! [`BehaviorRegistry::resolve`] looks up, in order: behaviors registered in code under the test's full name,
//! then a script at `<test_root>/<name>/<full_name>.toml` (see [`script`]), then [`NoopBehavior`]. A script
//! that fails to load degrades to the no-op behavior with a warning.

pub mod script;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::console::{Console, ConsoleError};

pub use script::{ScriptBehavior, ScriptError};

/// Test-specific console hooks.
#[async_trait]
pub trait Behavior: Send {
    /// Called on the boot console each time the handoff marker is seen.
    async fn on_primary_handoff(&mut self, _console: &mut Console) -> Result<i32, ConsoleError> {
        Ok(0)
    }

    /// Called on a Linux console once the shell answered.
    async fn on_secondary_ready(&mut self, _console: &mut Console) -> Result<i32, ConsoleError> {
        Ok(0)
    }
}

/// Behavior with both hooks left as no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBehavior;

impl Behavior for NoopBehavior {}

/// Constructor for a behavior registered in code.
pub type BehaviorFactory = fn() -> Box<dyn Behavior>;

/// Lookup of behaviors keyed on test name.
pub struct BehaviorRegistry {
    test_root: PathBuf,
    builtins: HashMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    pub fn new(test_root: impl Into<PathBuf>) -> Self {
        Self {
            test_root: test_root.into(),
            builtins: HashMap::new(),
        }
    }

    /// Register an in-code behavior for a full test name (`name` or `name-subtest`).
    pub fn register(&mut self, full_name: impl Into<String>, factory: BehaviorFactory) {
        self.builtins.insert(full_name.into(), factory);
    }

    /// Location of the behavior script for a test.
    pub fn script_path(&self, name: &str, full_name: &str) -> PathBuf {
        self.test_root.join(name).join(format!("{full_name}.toml"))
    }

    /// Resolve the behavior for a test. Never fails.
    pub fn resolve(&self, name: &str, full_name: &str) -> Box<dyn Behavior> {
        if let Some(factory) = self.builtins.get(full_name) {
            tracing::debug!(test = full_name, "using registered behavior");
            return factory();
        }
        load_or_noop(&self.script_path(name, full_name))
    }
}

/// Load a script, falling back to [`NoopBehavior`] when it is missing or unusable.
pub fn load_or_noop(path: &Path) -> Box<dyn Behavior> {
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "no behavior script, using no-op behavior");
        return Box::new(NoopBehavior);
    }
    match ScriptBehavior::from_file(path) {
        Ok(script) => {
            tracing::info!(path = %path.display(), "loaded behavior script");
            Box::new(script)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "behavior script unusable, using no-op behavior");
            Box::new(NoopBehavior)
        }
    }
}
