//! OS processes spawned through the PID table.
//!
//! stdout and stderr are classified line by line (`N::text` convention) by two
//! independent consumers. Only after both reach EOF is the exit status
//! collected from the table and the exit message sent, so the channel never
//! closes before the last output line.
//!
//! A process may report descendants with `101::<pid>`; they are signalled
//! along with it and included in its resource statistics.

use std::{
    collections::HashMap,
    os::unix::process::CommandExt,
    process::{ChildStderr, ChildStdin, ChildStdout, Command as StdCommand, Stdio},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tokio::{io::AsyncWriteExt, sync::mpsc};
use tracing::{debug, trace, warn};
use zpm_core::{
    CoreError, PidTable, Process, ProcessFactory, ProcessStats,
    stream::{Interceptor, consume},
};
use zpm_model::{Command, Level, Message};

use crate::{
    ExecError, ExecResult,
    util::{signal_group, signal_pid},
    utils::{RlimitConfig, attach_rlimits},
};

/// Command name the system process is registered under.
pub const SYSTEM_COMMAND: &str = "core.system";

const CHANNEL_CAPACITY: usize = 64;

/// Arguments of a `core.system` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemArgs {
    /// Program to run, looked up in `PATH` when not absolute.
    pub name: String,
    /// Working directory; empty keeps the manager's.
    pub dir: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: String,
    pub limits: Option<RlimitConfig>,
}

impl SystemArgs {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    fn to_std(&self) -> StdCommand {
        let mut cmd = StdCommand::new(&self.name);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if !self.dir.is_empty() {
            cmd.current_dir(&self.dir);
        }
        if let Some(limits) = &self.limits {
            attach_rlimits(&mut cmd, limits);
        }
        cmd
    }
}

/// A child process in its own process group.
pub struct SystemProcess {
    cmd: Command,
    args: Option<SystemArgs>,
    table: Arc<dyn PidTable>,
    pid: OnceLock<i32>,
    children: Arc<Mutex<Vec<i32>>>,
    system: Mutex<System>,
}

impl SystemProcess {
    /// Arguments are decoded from the command on `run`.
    pub fn new(table: Arc<dyn PidTable>, cmd: Command) -> Self {
        Self {
            cmd,
            args: None,
            table,
            pid: OnceLock::new(),
            children: Arc::new(Mutex::new(Vec::new())),
            system: Mutex::new(System::new()),
        }
    }

    /// Runs `args` on behalf of `cmd`, ignoring the command's own arguments.
    pub fn with_args(table: Arc<dyn PidTable>, cmd: Command, args: SystemArgs) -> Self {
        Self {
            args: Some(args),
            ..Self::new(table, cmd)
        }
    }

    pub fn factory() -> ProcessFactory {
        Arc::new(|table, cmd| Arc::new(SystemProcess::new(table, cmd)))
    }

    /// Descendant PIDs reported by the process and still alive at the last sample.
    pub fn children(&self) -> Vec<i32> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn resolve_args(&self) -> ExecResult<SystemArgs> {
        if let Some(args) = &self.args {
            return Ok(args.clone());
        }
        let args: SystemArgs = self
            .cmd
            .arguments
            .as_ref()
            .ok_or(ExecError::MissingProgram)?
            .parse()?;
        Ok(args)
    }

    fn spawn(&self, args: &SystemArgs) -> ExecResult<(i32, Pipes)> {
        if args.name.is_empty() {
            return Err(ExecError::MissingProgram);
        }

        let mut command = args.to_std();
        let mut pipes = None;
        let pid = self
            .table
            .register(&mut || {
                let mut child = command.spawn()?;
                let pid = child.id() as i32;
                pipes = Some(Pipes {
                    stdin: child.stdin.take(),
                    stdout: child.stdout.take(),
                    stderr: child.stderr.take(),
                });
                // The exit status is collected by the table, never through `Child`.
                drop(child);
                Ok(pid)
            })
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", args.name)))?;

        let pipes = pipes.ok_or_else(|| ExecError::Spawn(args.name.clone()))?;
        Ok((pid, pipes))
    }
}

struct Pipes {
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl Process for SystemProcess {
    fn command(&self) -> &Command {
        &self.cmd
    }

    fn run(&self) -> Result<mpsc::Receiver<Message>, CoreError> {
        let args = self.resolve_args()?;
        let (pid, pipes) = self.spawn(&args)?;
        let _ = self.pid.set(pid);
        debug!(target: "zpm.exec.system", id = %self.cmd.id, program = %args.name, pid, "spawned");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let table = Arc::clone(&self.table);
        let children = Arc::clone(&self.children);
        let id = self.cmd.id.clone();
        let Pipes { stdin, stdout, stderr } = pipes;

        tokio::spawn(async move {
            let interceptor: Interceptor = Arc::new(move |msg: &Message| track_child(&children, pid, msg));
            let mut consumers = Vec::with_capacity(2);

            if let Some(out) = stdout {
                match tokio::process::ChildStdout::from_std(out) {
                    Ok(out) => consumers.push(consume(out, Level::STDOUT, tx.clone(), Some(interceptor.clone()))),
                    Err(e) => warn!(target: "zpm.exec.system", %id, error = %e, "stdout unavailable"),
                }
            }
            if let Some(err) = stderr {
                match tokio::process::ChildStderr::from_std(err) {
                    Ok(err) => consumers.push(consume(err, Level::STDERR, tx.clone(), Some(interceptor))),
                    Err(e) => warn!(target: "zpm.exec.system", %id, error = %e, "stderr unavailable"),
                }
            }
            if let Some(input) = stdin {
                feed_stdin(&id, input, args.stdin);
            }

            for consumer in consumers {
                let _ = consumer.await;
            }

            let status = table.wait_pid(pid).await;
            debug!(target: "zpm.exec.system", %id, pid, ?status, "exited");

            let exit = if status.success() {
                Message::exit_success()
            } else {
                Message::exit_error()
            };
            let _ = tx.send(exit).await;
        });

        Ok(rx)
    }

    /// Signals the whole process group and every tracked descendant.
    fn signal(&self, sig: Signal) -> Result<(), CoreError> {
        let pid = *self.pid.get().ok_or_else(|| CoreError::NotFound(self.cmd.id.clone()))?;
        for child in self.children() {
            if let Err(e) = signal_pid(child, sig) {
                debug!(target: "zpm.exec.system", child, error = %e, "failed to signal descendant");
            }
        }
        signal_group(pid, sig)
    }

    fn stats(&self) -> Option<ProcessStats> {
        let pid = *self.pid.get()?;
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|child| *child != pid);

        let pids: Vec<SysPid> = std::iter::once(pid)
            .chain(children.iter().copied())
            .map(|p| SysPid::from_u32(p as u32))
            .collect();
        system.refresh_processes(ProcessesToUpdate::Some(&pids), true);

        let mut stats = sample(pid, system.process(SysPid::from_u32(pid as u32))?);
        children.retain(|child| match system.process(SysPid::from_u32(*child as u32)) {
            Some(proc) => {
                let s = sample(*child, proc);
                stats.cpu += s.cpu;
                stats.rss += s.rss;
                stats.vms += s.vms;
                stats.swap += s.swap;
                true
            }
            None => {
                trace!(target: "zpm.exec.system", child, "descendant gone; untracking");
                false
            }
        });
        Some(stats)
    }

    fn pid(&self) -> Option<i32> {
        self.pid.get().copied()
    }
}

fn sample(pid: i32, proc: &sysinfo::Process) -> ProcessStats {
    ProcessStats {
        cpu: f64::from(proc.cpu_usage()),
        rss: proc.memory(),
        vms: proc.virtual_memory(),
        swap: read_swap(pid).unwrap_or_default(),
    }
}

/// Swapped-out bytes of `pid`, read from `/proc/<pid>/status`.
fn read_swap(pid: i32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_swap(&status)
}

fn parse_vm_swap(status: &str) -> Option<u64> {
    let line = status.lines().find_map(|l| l.strip_prefix("VmSwap:"))?;
    let kib: u64 = line.trim().trim_end_matches("kB").trim().parse().ok()?;
    Some(kib * 1024)
}

/// Records a `101::<pid>` descendant report. Self-reports and repeats are ignored.
fn track_child(children: &Mutex<Vec<i32>>, root: i32, msg: &Message) {
    if msg.level() != Level::INTERNAL_MONITOR_PID {
        return;
    }
    match msg.message.trim().parse::<i32>() {
        Ok(child) if child > 0 && child != root => {
            let mut children = children.lock().unwrap_or_else(PoisonError::into_inner);
            if !children.contains(&child) {
                debug!(target: "zpm.exec.system", child, "tracking descendant");
                children.push(child);
            }
        }
        Ok(child) if child == root => trace!(target: "zpm.exec.system", child, "ignoring self report"),
        _ => trace!(target: "zpm.exec.system", payload = %msg.message, "ignoring malformed pid report"),
    }
}

fn feed_stdin(id: &str, input: ChildStdin, payload: String) {
    let id = id.to_string();
    tokio::spawn(async move {
        let mut writer = match tokio::process::ChildStdin::from_std(input) {
            Ok(w) => w,
            Err(e) => {
                warn!(target: "zpm.exec.system", %id, error = %e, "stdin unavailable");
                return;
            }
        };
        if !payload.is_empty()
            && let Err(e) = writer.write_all(payload.as_bytes()).await
        {
            debug!(target: "zpm.exec.system", %id, error = %e, "stdin write failed");
        }
        // Dropping the writer closes the pipe.
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use zpm_model::Arguments;

    #[test]
    fn decodes_arguments_with_defaults() {
        let args: SystemArgs = Arguments::new(json!({
            "name": "sh",
            "args": ["-c", "true"],
            "limits": {"disable_core_dumps": true}
        }))
        .parse()
        .unwrap();
        assert_eq!(args.name, "sh");
        assert_eq!(args.args, vec!["-c", "true"]);
        assert!(args.env.is_empty());
        assert!(args.limits.unwrap().disable_core_dumps);
    }

    #[test]
    fn monitor_pid_messages_are_tracked() {
        let children = Mutex::new(Vec::new());
        track_child(&children, 1000, &Message::new(Level::INTERNAL_MONITOR_PID, "4242"));
        track_child(&children, 1000, &Message::new(Level::INTERNAL_MONITOR_PID, "not-a-pid"));
        track_child(&children, 1000, &Message::new(Level::INTERNAL, "77"));
        assert_eq!(*children.lock().unwrap(), vec![4242]);
    }

    #[test]
    fn own_pid_report_is_not_a_descendant() {
        let children = Mutex::new(Vec::new());
        track_child(&children, 1000, &Message::new(Level::INTERNAL_MONITOR_PID, "1000"));
        assert!(children.lock().unwrap().is_empty());
    }

    #[test]
    fn repeated_descendant_is_tracked_once() {
        let children = Mutex::new(Vec::new());
        for _ in 0..3 {
            track_child(&children, 1000, &Message::new(Level::INTERNAL_MONITOR_PID, " 4242 "));
        }
        track_child(&children, 1000, &Message::new(Level::INTERNAL_MONITOR_PID, "4343"));
        assert_eq!(*children.lock().unwrap(), vec![4242, 4343]);
    }

    #[test]
    fn vm_swap_is_read_in_bytes() {
        let status = "Name:\tsleep\nVmRSS:\t    1732 kB\nVmSwap:\t      12 kB\nThreads:\t1\n";
        assert_eq!(parse_vm_swap(status), Some(12 * 1024));
        assert_eq!(parse_vm_swap("Name:\tkthreadd\n"), None);
    }

    #[test]
    fn own_swap_is_readable() {
        assert!(read_swap(std::process::id() as i32).is_some());
    }

    #[test]
    fn missing_program_is_rejected_before_spawn() {
        let process = SystemProcess::new(zpm_core::SystemPidTable::global(), Command::new(SYSTEM_COMMAND));
        let err = process.resolve_args().unwrap_err();
        assert!(matches!(err, ExecError::MissingProgram));
        assert!(process.pid().is_none());
    }
}
