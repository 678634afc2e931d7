//! Unix signal delivery for teardown.
//!
//! `std::process::Child` can only SIGKILL; teardown needs SIGINT (simulator, multiplexer) and SIGTERM
//! (stragglers), and console sessions kill a whole process group.

use std::io;

/// Signals used by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Send `signal` to process `pid`.
#[cfg(unix)]
pub fn send(pid: u32, signal: Signal) -> io::Result<()> {
    raw_kill(to_pid(pid)?, signal)
}

/// Send `signal` to the process group led by `pid`.
#[cfg(unix)]
pub fn send_to_group(pid: u32, signal: Signal) -> io::Result<()> {
    raw_kill(-to_pid(pid)?, signal)
}

#[cfg(unix)]
fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}"))),
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn raw_kill(target: libc::pid_t, signal: Signal) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions; the target is a pid or negated pgid.
    let rc = unsafe { libc::kill(target, signal.as_raw()) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(unix))]
pub fn send(_pid: u32, _signal: Signal) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals are only supported on unix"))
}

#[cfg(not(unix))]
pub fn send_to_group(_pid: u32, _signal: Signal) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals are only supported on unix"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pid_is_rejected() {
        let err = send(0, Signal::Terminate).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_interrupt_stops_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        send(child.id(), Signal::Interrupt).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
