//! # PID reaper table.
//!
//! Child processes spawned by the manager are never waited on through
//! `std::process::Child::wait`. Instead a single reaper thread listens for
//! `SIGCHLD`, reaps every dead child with `waitpid(-1, WNOHANG)` and hands the
//! status to whoever registered that PID.
//!
//! ## Registration
//! [`PidTable::register`] runs the spawn closure *while holding* the table lock,
//! and the reaper takes the same lock before calling `waitpid`. A child can
//! therefore never be reaped before its entry exists.
//!
//! ## Delivery
//! Each entry is a oneshot pair. The reaper fills the sender; [`PidTable::wait_pid`]
//! takes the receiver. Whichever side comes second removes the entry, so a
//! status delivered before anyone waits stays buffered.
//!
//! Because `waitpid(-1)` reaps *every* child of the process, anything else in
//! the same process that spawns children must go through the table too.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use async_trait::async_trait;
use nix::{
    errno::Errno,
    sys::wait::{WaitPidFlag, WaitStatus as NixWaitStatus, waitpid},
    unistd::Pid,
};
use signal_hook::{consts::SIGCHLD, iterator::Signals};
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

/// Exit status of a reaped child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

impl WaitStatus {
    #[inline]
    pub fn success(&self) -> bool {
        matches!(self, WaitStatus::Exited(0))
    }

    /// Exit code, `None` when the child was killed by a signal.
    #[inline]
    pub fn code(&self) -> Option<i32> {
        match self {
            WaitStatus::Exited(code) => Some(*code),
            WaitStatus::Signaled(_) => None,
        }
    }
}

impl Default for WaitStatus {
    fn default() -> Self {
        WaitStatus::Exited(0)
    }
}

/// Registry of child PIDs awaiting their exit status.
#[async_trait]
pub trait PidTable: Send + Sync {
    /// Calls `spawn` and registers the PID it returns, atomically with respect to reaping.
    fn register(&self, spawn: &mut dyn FnMut() -> io::Result<i32>) -> io::Result<i32>;

    /// Waits for the exit status of `pid`.
    ///
    /// Returns the default (zero) status if the PID was never registered.
    async fn wait_pid(&self, pid: i32) -> WaitStatus;
}

#[derive(Default)]
struct Slot {
    tx: Option<oneshot::Sender<WaitStatus>>,
    rx: Option<oneshot::Receiver<WaitStatus>>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

/// The process-wide `SIGCHLD` driven [`PidTable`].
pub struct SystemPidTable {
    slots: Mutex<HashMap<i32, Slot>>,
    running: bool,
}

static GLOBAL: OnceLock<Arc<SystemPidTable>> = OnceLock::new();

impl SystemPidTable {
    /// Returns the process-wide table, starting the reaper thread on first use.
    pub fn global() -> Arc<SystemPidTable> {
        GLOBAL.get_or_init(Self::start).clone()
    }

    fn start() -> Arc<SystemPidTable> {
        // The handler must be installed before the first child is spawned.
        let signals = match Signals::new([SIGCHLD]) {
            Ok(s) => s,
            Err(e) => {
                error!(target: "zpm.core.reaper", error = %e, "failed to subscribe to SIGCHLD");
                return Arc::new(Self::stopped());
            }
        };

        let table = Arc::new(SystemPidTable {
            slots: Mutex::new(HashMap::new()),
            running: true,
        });

        let reaper = Arc::clone(&table);
        let spawned = std::thread::Builder::new()
            .name("zpm-reaper".into())
            .spawn(move || {
                let mut signals = signals;
                reaper.reap();
                for _ in signals.forever() {
                    reaper.reap();
                }
            });

        match spawned {
            Ok(_) => {
                debug!(target: "zpm.core.reaper", "reaper thread started");
                table
            }
            Err(e) => {
                error!(target: "zpm.core.reaper", error = %e, "failed to start reaper thread");
                Arc::new(Self::stopped())
            }
        }
    }

    fn stopped() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            running: false,
        }
    }

    /// Reaps every dead child; one signal may stand for several deaths.
    fn reap(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(NixWaitStatus::Exited(pid, code)) => (pid.as_raw(), WaitStatus::Exited(code)),
                Ok(NixWaitStatus::Signaled(pid, sig, _)) => {
                    (pid.as_raw(), WaitStatus::Signaled(sig as i32))
                }
                Ok(NixWaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!(target: "zpm.core.reaper", error = %e, "waitpid failed");
                    break;
                }
            };
            deliver(&mut slots, status.0, status.1);
        }
    }
}

fn deliver(slots: &mut HashMap<i32, Slot>, pid: i32, status: WaitStatus) {
    let Some(slot) = slots.get_mut(&pid) else {
        trace!(target: "zpm.core.reaper", pid, ?status, "reaped unregistered child");
        return;
    };

    trace!(target: "zpm.core.reaper", pid, ?status, "reaped child");
    if let Some(tx) = slot.tx.take() {
        let _ = tx.send(status);
    }
    if slot.rx.is_none() {
        slots.remove(&pid);
    }
}

#[async_trait]
impl PidTable for SystemPidTable {
    fn register(&self, spawn: &mut dyn FnMut() -> io::Result<i32>) -> io::Result<i32> {
        if !self.running {
            return Err(io::Error::other("pid reaper is not running"));
        }

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = spawn()?;
        slots.insert(pid, Slot::new());
        Ok(pid)
    }

    async fn wait_pid(&self, pid: i32) -> WaitStatus {
        let rx = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(slot) = slots.get_mut(&pid) else {
                return WaitStatus::default();
            };
            let rx = slot.rx.take();
            if slot.tx.is_none() {
                slots.remove(&pid);
            }
            rx
        };

        match rx {
            Some(rx) => rx.await.unwrap_or_default(),
            None => WaitStatus::default(),
        }
    }
}
