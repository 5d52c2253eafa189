use std::io;

use nix::{
    errno::Errno,
    sys::signal::{Signal, kill, killpg},
    unistd::Pid,
};
use zpm_core::CoreError;

/// Sends `sig` to the process group led by `pid`.
///
/// A group that is already gone is not an error.
pub fn signal_group(pid: i32, sig: Signal) -> Result<(), CoreError> {
    ignore_gone(killpg(Pid::from_raw(pid), sig))
}

/// Sends `sig` to a single process.
pub fn signal_pid(pid: i32, sig: Signal) -> Result<(), CoreError> {
    ignore_gone(kill(Pid::from_raw(pid), sig))
}

/// Signal-0 probe.
pub fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

fn ignore_gone(res: nix::Result<()>) -> Result<(), CoreError> {
    match res {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CoreError::Io(io::Error::from(e))),
    }
}
