//! Console multiplexer launch commands.
//!
//! The multiplexer bridges one listening TCP port per console (`start_port + i`) to the target's console
//! transport. For simulated targets it runs locally against the simulator's console endpoint; for hardware it
//! runs on the console server, started through the `remote-hw` subcommand.

use std::path::Path;

use hvharness_core::TargetKind;

use crate::config::HarnessConfig;
use crate::process::{ProcessSpec, SelfInvocation};

/// Ports served for `count` consoles starting at `start_port`, or `None` if they do not fit in `u16`.
pub fn console_ports(start_port: u16, count: usize) -> Option<Vec<u16>> {
    (0..count)
        .map(|i| u16::try_from(i).ok().and_then(|i| start_port.checked_add(i)))
        .collect()
}

fn port_list(ports: &[u16]) -> String {
    ports.iter().map(u16::to_string).collect::<Vec<_>>().join(" ")
}

/// Shell command that starts the multiplexer on the remote console server.
pub fn remote_mux_command(config: &HarnessConfig, ports: &[u16]) -> String {
    format!(
        "{} -exec \"skermit -con {}\" {}",
        config.mux.remote_binary,
        config.remote.board,
        port_list(ports)
    )
}

/// Process spec for the multiplexer of one run.
pub fn mux_spec(
    config: &HarnessConfig,
    kind: TargetKind,
    ports: &[u16],
    harness: &SelfInvocation,
    log_path: &Path,
) -> ProcessSpec {
    let spec = match kind {
        TargetKind::Simulated => ProcessSpec::new(&config.mux.binary)
            .arg(config.mux.sim_endpoint.clone())
            .args(ports.iter().map(u16::to_string)),
        TargetKind::Hardware => harness.spec("remote-hw", [remote_mux_command(config, ports)]),
    };
    spec.output_to(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_console_ports_are_consecutive() {
        assert_eq!(console_ports(23400, 3), Some(vec![23400, 23401, 23402]));
        assert_eq!(console_ports(23400, 0), Some(vec![]));
    }

    #[test]
    fn test_console_ports_reject_overflow() {
        assert_eq!(console_ports(u16::MAX, 2), None);
        assert_eq!(console_ports(u16::MAX, 1), Some(vec![u16::MAX]));
    }

    #[test]
    fn test_simulated_mux_runs_locally() {
        let config = HarnessConfig::default();
        let harness = SelfInvocation::new("hvharness", None);
        let spec = mux_spec(&config, TargetKind::Simulated, &[23400, 23401], &harness, Path::new("x-mux.log"));
        assert_eq!(spec.program, PathBuf::from("../../tools/mux_server/mux_server"));
        assert_eq!(spec.args, vec!["localhost:9124", "23400", "23401"]);
        assert_eq!(spec.output, Some(PathBuf::from("x-mux.log")));
    }

    #[test]
    fn test_hardware_mux_goes_through_remote_helper() {
        let config = HarnessConfig::default();
        let harness = SelfInvocation::new("/opt/hvharness", None);
        let spec = mux_spec(&config, TargetKind::Hardware, &[23400, 23401], &harness, Path::new("x-mux.log"));
        assert_eq!(spec.program, PathBuf::from("/opt/hvharness"));
        assert_eq!(
            spec.args,
            vec!["remote-hw", "mux_server -exec \"skermit -con grinch\" 23400 23401"]
        );
    }
}
