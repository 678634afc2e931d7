//! Boot supervisor for console 0
//!
//! Console 0 carries the boot loader (hardware only) and then the hypervisor console. The supervisor:
//!
//! 1. on hardware targets, resets the board from the boot loader and has it fetch and source the test image;
//! 2. waits for the hypervisor banner;
//! 3. watches the hypervisor console forever, running the test's [`Behavior::on_primary_handoff`] hook each
//!    time a partition hands over to the reset-status guest.
//!
//! There is no success exit: the coordinator kills the supervisor once enough consoles finished. Stream closure
//! and timeouts end it with the same failure contract as a [`crate::listener`].

use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use hvharness_core::markers;

use crate::behavior::Behavior;
use crate::config::RemoteConfig;
use crate::console::{Console, ConsoleError, Pattern};
use crate::listener::{self, ListenOutcome};

/// Timeouts of the boot dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootTimeouts {
    /// First boot loader prompt after a carriage return.
    pub bootloader_prompt: Duration,
    /// Pause after issuing the board reset.
    pub reset_pause: Duration,
    /// Boot loader prompt after the reset.
    pub reset_prompt: Duration,
    /// Prompt after `setenv`.
    pub setenv: Duration,
    /// Prompt after the TFTP transfer.
    pub transfer: Duration,
    /// Hypervisor banner.
    pub banner: Duration,
    /// Each iteration of the hypervisor console watch.
    pub watch: Duration,
}

impl Default for BootTimeouts {
    fn default() -> Self {
        Self {
            bootloader_prompt: Duration::from_secs(10),
            reset_pause: Duration::from_secs(2),
            reset_prompt: Duration::from_secs(20),
            setenv: Duration::from_secs(10),
            transfer: Duration::from_secs(20),
            banner: Duration::from_secs(120),
            watch: Duration::from_secs(300),
        }
    }
}

/// Boot loader commands for a hardware target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareHandshake {
    pub reset_command: String,
    /// TFTP directory holding the test's boot script.
    pub unit_test_dir: String,
    /// Boot script name without the `.ubs` extension.
    pub image: String,
}

impl HardwareHandshake {
    pub fn new(remote: &RemoteConfig, name: &str, full_name: &str) -> Self {
        Self {
            reset_command: remote.board_reset_command.clone(),
            unit_test_dir: format!("{}{}", remote.testdir, name),
            image: full_name.to_string(),
        }
    }
}

/// Supervises console 0 of a run.
#[derive(Debug, Clone, Default)]
pub struct BootSupervisor {
    handshake: Option<HardwareHandshake>,
    timeouts: BootTimeouts,
}

impl BootSupervisor {
    /// Supervisor for a simulated target; the hypervisor starts on its own.
    pub fn simulated() -> Self {
        Self::default()
    }

    pub fn hardware(handshake: HardwareHandshake) -> Self {
        Self {
            handshake: Some(handshake),
            timeouts: BootTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: BootTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Drive console 0 until it fails. Only returns on a console error.
    pub async fn supervise(
        &self,
        console: &mut Console,
        behavior: &mut dyn Behavior,
    ) -> Result<Infallible, ConsoleError> {
        if let Some(handshake) = &self.handshake {
            self.boot_hardware(console, handshake).await?;
        }
        console.expect_exact(markers::HYPERVISOR_BANNER, self.timeouts.banner).await?;
        tracing::info!("hypervisor is up");

        let watch: Vec<Pattern> = markers::BOOT_WATCH_PATTERNS.iter().copied().map(Pattern::exact).collect();
        let handoff = watch.len() - 1;
        loop {
            let found = console.expect(&watch, self.timeouts.watch).await?;
            if found.index == handoff {
                let status = behavior.on_primary_handoff(console).await?;
                if status != 0 {
                    tracing::warn!(status, "primary handoff behavior reported failure");
                }
            }
        }
    }

    async fn boot_hardware(&self, console: &mut Console, handshake: &HardwareHandshake) -> Result<(), ConsoleError> {
        let t = &self.timeouts;
        console.send("\r").await?;
        console.expect_exact(markers::BOOTLOADER_PROMPT, t.bootloader_prompt).await?;
        console.send(&format!("{}\r", handshake.reset_command)).await?;
        tokio::time::sleep(t.reset_pause).await;
        console.send("\r").await?;
        console.expect_exact(markers::BOOTLOADER_PROMPT, t.reset_prompt).await?;
        console
            .send(&format!("setenv unittestdir {}\r", handshake.unit_test_dir))
            .await?;
        console.expect_exact(markers::BOOTLOADER_PROMPT, t.setenv).await?;
        console
            .send(&format!("tftp 100000 $unittestdir/{}.ubs\r", handshake.image))
            .await?;
        console.expect_exact(markers::BOOTLOADER_PROMPT, t.transfer).await?;
        console.send("source 100000\r").await?;
        tracing::info!(image = %handshake.image, "boot script sourced");
        Ok(())
    }

    /// Attach to console 0 and supervise it until it fails.
    pub async fn run(&self, command: &str, log_path: &Path, behavior: &mut dyn Behavior) -> ListenOutcome {
        let mut console = match Console::spawn_logged(command, log_path).await {
            Ok(console) => console,
            Err(e) => {
                listener::record_spawn_failure(log_path, &e);
                return ListenOutcome::SpawnFailed;
            }
        };
        let error = match self.supervise(&mut console, behavior).await {
            Ok(never) => match never {},
            Err(e) => e,
        };
        listener::conclude(&mut console, Err(error)).await
    }
}
