//! A process isolated in fresh PID, mount and UTS namespaces (plus network
//! unless `host_network`), optionally chrooted.
//!
//! Pipes cannot be created once the child is inside its root, so a private
//! channel (two pipes) is prepared beforehand and handed to the child on fixed
//! descriptors: fd 3 reads what the manager writes, fd 4 writes what the
//! manager reads. Standard streams are bound to `/dev/null`.
//!
//! `unshare(CLONE_NEWPID)` applies to the children of the calling process, so
//! the spawned program is the parent of the new PID namespace and its first
//! child becomes PID 1 inside it.

use std::{
    collections::HashMap,
    fs::File,
    os::{
        fd::{AsRawFd, OwnedFd, RawFd},
        unix::process::CommandExt,
    },
    process::{Command as StdCommand, Stdio},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use nix::{
    fcntl::OFlag,
    sched::{CloneFlags, unshare},
    sys::signal::Signal,
    unistd::{chdir, chroot, pipe2, setsid},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use zpm_core::{CoreError, PidTable, Process, ProcessFactory};
use zpm_model::{Command, Message};

use crate::{ExecError, ExecResult, util::signal_pid};

/// Command name the container process is registered under.
pub const CONTAINER_COMMAND: &str = "core.container";

/// Descriptor the child reads the channel from.
pub const CHANNEL_READ_FD: RawFd = 3;
/// Descriptor the child writes the channel to.
pub const CHANNEL_WRITE_FD: RawFd = 4;

/// Arguments of a `core.container` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerArgs {
    /// Program path, resolved inside `chroot`.
    pub name: String,
    /// Working directory inside `chroot`; empty means `/`.
    pub dir: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub host_network: bool,
    /// New root directory; empty keeps the host root.
    pub chroot: String,
}

impl ContainerArgs {
    fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUTS;
        if !self.host_network {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        flags
    }
}

/// The manager's ends of the private channel.
#[derive(Debug)]
pub struct Channel {
    reader: File,
    writer: File,
}

impl Channel {
    /// Receives what the container writes to fd 4.
    pub fn reader(&self) -> &File {
        &self.reader
    }

    /// Delivers to the container's fd 3.
    pub fn writer(&self) -> &File {
        &self.writer
    }
}

pub struct ContainerProcess {
    cmd: Command,
    table: Arc<dyn PidTable>,
    pid: OnceLock<i32>,
    channel: Arc<Mutex<Option<Arc<Channel>>>>,
}

impl ContainerProcess {
    pub fn new(table: Arc<dyn PidTable>, cmd: Command) -> Self {
        Self {
            cmd,
            table,
            pid: OnceLock::new(),
            channel: Arc::new(Mutex::new(None)),
        }
    }

    pub fn factory() -> ProcessFactory {
        Arc::new(|table, cmd| Arc::new(ContainerProcess::new(table, cmd)))
    }

    /// The private channel while the container runs; `None` before start and after exit.
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn args(&self) -> ExecResult<ContainerArgs> {
        let args: ContainerArgs = self
            .cmd
            .arguments
            .as_ref()
            .ok_or(ExecError::MissingProgram)?
            .parse()?;
        if args.name.is_empty() {
            return Err(ExecError::MissingProgram);
        }
        Ok(args)
    }

    fn spawn(&self, args: &ContainerArgs) -> ExecResult<i32> {
        let (to_child_r, to_child_w) = pipe2(OFlag::O_CLOEXEC).map_err(std::io::Error::from)?;
        let (from_child_r, from_child_w) = pipe2(OFlag::O_CLOEXEC).map_err(std::io::Error::from)?;

        let mut command = StdCommand::new(&args.name);
        command
            .args(&args.args)
            .envs(&args.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        isolate(&mut command, args, &to_child_r, &from_child_w);

        let pid = self
            .table
            .register(&mut || command.spawn().map(|child| child.id() as i32))
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", args.name)))?;

        // Child ends are closed here; the container holds its own copies.
        drop(command);
        drop(to_child_r);
        drop(from_child_w);

        *self.channel.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(Channel {
            reader: File::from(from_child_r),
            writer: File::from(to_child_w),
        }));
        Ok(pid)
    }
}

/// Installs the namespace, root and descriptor setup run in the child.
fn isolate(command: &mut StdCommand, args: &ContainerArgs, read: &OwnedFd, write: &OwnedFd) {
    let flags = args.clone_flags();
    let root = (!args.chroot.is_empty()).then(|| args.chroot.clone());
    let dir = if args.dir.is_empty() { "/".to_string() } else { args.dir.clone() };
    let read = read.as_raw_fd();
    let write = write.as_raw_fd();

    // SAFETY: only raw syscalls run between fork and exec.
    unsafe {
        command.pre_exec(move || {
            setsid()?;
            unshare(flags)?;
            if let Some(root) = &root {
                chroot(root.as_str())?;
            }
            chdir(dir.as_str())?;
            place_fd(read, CHANNEL_READ_FD)?;
            place_fd(write, CHANNEL_WRITE_FD)?;
            Ok(())
        });
    }
}

/// Moves `fd` to `target` without the close-on-exec flag.
///
/// Goes through a descriptor above both targets first so that placing one end
/// never clobbers the other.
fn place_fd(fd: RawFd, target: RawFd) -> std::io::Result<()> {
    let high = unsafe { libc::fcntl(fd, libc::F_DUPFD, CHANNEL_WRITE_FD + 1) };
    if high < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::dup2(high, target) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    unsafe { libc::close(high) };
    Ok(())
}

impl Process for ContainerProcess {
    fn command(&self) -> &Command {
        &self.cmd
    }

    fn run(&self) -> Result<mpsc::Receiver<Message>, CoreError> {
        let args = self.args()?;
        let pid = self.spawn(&args)?;
        let _ = self.pid.set(pid);
        debug!(target: "zpm.exec.container", id = %self.cmd.id, program = %args.name, pid, "container started");

        let (tx, rx) = mpsc::channel(1);
        let table = Arc::clone(&self.table);
        let channel = Arc::clone(&self.channel);
        let id = self.cmd.id.clone();

        tokio::spawn(async move {
            let status = table.wait_pid(pid).await;
            debug!(target: "zpm.exec.container", %id, pid, ?status, "container exited");
            channel.lock().unwrap_or_else(PoisonError::into_inner).take();

            let exit = if status.success() {
                Message::exit_success()
            } else {
                Message::exit_error()
            };
            let _ = tx.send(exit).await;
        });

        Ok(rx)
    }

    fn signal(&self, sig: Signal) -> Result<(), CoreError> {
        let pid = *self.pid.get().ok_or_else(|| CoreError::NotFound(self.cmd.id.clone()))?;
        signal_pid(pid, sig)
    }

    fn pid(&self) -> Option<i32> {
        self.pid.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn network_namespace_follows_host_network() {
        let isolated = ContainerArgs::default();
        assert!(isolated.clone_flags().contains(CloneFlags::CLONE_NEWNET));

        let shared = ContainerArgs {
            host_network: true,
            ..ContainerArgs::default()
        };
        let flags = shared.clone_flags();
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUTS));
    }

    #[test]
    fn requires_a_program() {
        let cmd = Command::new(CONTAINER_COMMAND).with_arguments(json!({"chroot": "/tmp"}));
        let process = ContainerProcess::new(zpm_core::SystemPidTable::global(), cmd);
        assert!(matches!(process.args(), Err(ExecError::MissingProgram)));
        assert!(process.channel().is_none());
    }
}
