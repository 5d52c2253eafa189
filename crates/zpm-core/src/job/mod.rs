//! # Job runner.
//!
//! A [`Job`] owns the whole lifecycle of one admitted command: it builds a
//! fresh [`Process`] per attempt, multiplexes the message channel against
//! kill, timeout, hook tick and meter events, turns the run into a
//! [`JobResult`] and applies the restart policy:
//!
//! 1. `Killed` is terminal, for protected jobs too.
//! 2. A spawn failure is terminal; rerunning a malformed command cannot help.
//! 3. A protected job respawns immediately.
//! 4. A failed run is retried after `restart_delay` while fewer than
//!    `max_restart` attempts were made. A timed-out run is not.
//! 5. A recurring job reruns after its period, whatever the outcome.
//!
//! A kill during a backoff wait ends the job as `Killed` without another
//! attempt. Only the last result is published to the result handlers.

use std::{
    any::Any,
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use futures::FutureExt;
use nix::sys::signal::Signal;
use tokio::{
    sync::{OwnedSemaphorePermit, mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, trace, warn};
use zpm_model::{Command, JobResult, JobState, Level, Message, Meta, Streams};

use crate::{
    HookRef, PidTable, Process, ProcessFactory, ProcessManager, WaitStatus, hooks,
    stream::{RingBuffer, join_lines},
};

/// Per-job message listener.
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

/// Time a killed process gets to exit after `SIGTERM` before it is sent `SIGKILL`.
const KILL_GRACE: Duration = Duration::from_secs(5);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live supervisor of one command.
pub struct Job {
    cmd: Command,
    factory: ProcessFactory,
    hooks: Vec<HookRef>,
    manager: Arc<ProcessManager>,

    kill_tx: mpsc::Sender<()>,
    kill_rx: Mutex<Option<mpsc::Receiver<()>>>,

    process: Mutex<Option<Arc<dyn Process>>>,
    start_time: Mutex<Option<SystemTime>>,
    backlog: Mutex<RingBuffer<Message>>,
    subscribers: RwLock<Vec<Subscriber>>,
    result: watch::Sender<Option<JobResult>>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

struct Attempt {
    result: JobResult,
    spawned: bool,
}

impl Job {
    pub(crate) fn new(
        manager: Arc<ProcessManager>,
        cmd: Command,
        factory: ProcessFactory,
        hooks: Vec<HookRef>,
    ) -> Arc<Self> {
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let backlog = RingBuffer::new(manager.config().backlog_buffer_clamped());
        Arc::new(Self {
            cmd,
            factory,
            hooks,
            manager,
            kill_tx,
            kill_rx: Mutex::new(Some(kill_rx)),
            process: Mutex::new(None),
            start_time: Mutex::new(None),
            backlog: Mutex::new(backlog),
            subscribers: RwLock::new(Vec::new()),
            result: watch::Sender::new(None),
            permit: Mutex::new(None),
        })
    }

    #[inline]
    pub fn command(&self) -> &Command {
        &self.cmd
    }

    /// Asks the job to stop.
    ///
    /// The request is observed at the next event of the run loop or during a
    /// backoff wait. A job that has not started yet ends as `Killed` without
    /// spawning anything.
    pub fn terminate(&self) {
        if self.kill_tx.try_send(()).is_ok() {
            debug!(target: "zpm.core.job", cmd = %self.cmd, "terminate requested");
        }
    }

    /// The process of the current attempt, if one is running.
    pub fn process(&self) -> Option<Arc<dyn Process>> {
        lock(&self.process).clone()
    }

    pub fn pid(&self) -> Option<i32> {
        self.process().and_then(|p| p.pid())
    }

    /// Start of the current (or last) attempt.
    pub fn start_time(&self) -> Option<SystemTime> {
        *lock(&self.start_time)
    }

    /// Terminal result, once the job is done.
    pub fn result(&self) -> Option<JobResult> {
        self.result.borrow().clone()
    }

    /// Waits for the terminal result.
    pub async fn wait(&self) -> JobResult {
        let mut rx = self.result.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(res) => res.clone().unwrap_or_else(|| JobResult::new(&self.cmd, JobState::Error)),
            Err(_) => JobResult::new(&self.cmd, JobState::Error),
        }
    }

    /// Adds a listener for this job's messages.
    ///
    /// The backlog is replayed first. A message that arrives while the
    /// backlog is being replayed may reach this listener twice or out of
    /// order, but is never lost.
    pub fn subscribe(&self, handler: Subscriber) {
        // The runner appends under the backlog lock before fanning out, so
        // registering under it leaves no message between snapshot and push.
        let backlog = {
            let backlog = lock(&self.backlog);
            self.subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&handler));
            backlog.to_vec()
        };
        for msg in &backlog {
            deliver(&self.cmd, &handler, msg);
        }
    }

    pub(crate) fn set_permit(&self, permit: Option<OwnedSemaphorePermit>) {
        *lock(&self.permit) = permit;
    }

    pub(crate) fn start(self: &Arc<Self>) {
        let job = Arc::clone(self);
        tokio::spawn(async move { job.supervise().await });
    }

    async fn supervise(self: Arc<Self>) {
        let Some(mut kill) = lock(&self.kill_rx).take() else {
            warn!(target: "zpm.core.job", cmd = %self.cmd, "job started twice");
            return;
        };

        let mut runs: u32 = 0;
        let result = loop {
            if kill.try_recv().is_ok() {
                info!(target: "zpm.core.job", cmd = %self.cmd, "killed before start");
                let mut result = JobResult::new(&self.cmd, JobState::Killed);
                result.stamp(SystemTime::now(), Duration::ZERO);
                break result;
            }

            let Attempt { mut result, spawned } = self.attempt(&mut kill).await;
            hooks::spawn_exit(&self.hooks, result.state);

            if result.state == JobState::Killed || !spawned {
                break result;
            }

            if self.cmd.flags.protected {
                debug!(target: "zpm.core.job", cmd = %self.cmd, state = %result.state, "respawning protected job");
                continue;
            }

            let mut delay = None;
            if result.state == JobState::Error && self.cmd.max_restart > 0 {
                runs += 1;
                if runs < self.cmd.max_restart {
                    debug!(
                        target: "zpm.core.job",
                        cmd = %self.cmd,
                        attempt = runs + 1,
                        max = self.cmd.max_restart,
                        "restarting after abnormal exit"
                    );
                    delay = Some(self.manager.config().restart_delay);
                }
            }
            if let Some(period) = self.cmd.recurring() {
                delay = Some(period);
            }

            let Some(delay) = delay else {
                break result;
            };

            trace!(target: "zpm.core.job", cmd = %self.cmd, ?delay, "scheduled rerun");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Some(()) = kill.recv() => {
                    info!(target: "zpm.core.job", cmd = %self.cmd, "killed during backoff");
                    result.state = JobState::Killed;
                    break result;
                }
            }
        };

        self.finish(result).await;
    }

    async fn finish(&self, mut result: JobResult) {
        self.manager.untrack(self);
        lock(&self.permit).take();

        self.manager.result_callback(&self.cmd, &mut result);
        debug!(target: "zpm.core.job", cmd = %self.cmd, state = %result.state, "job done");
        self.result.send_replace(Some(result));

        self.manager.queue_notify(&self.cmd.queue).await;
    }

    async fn attempt(&self, kill: &mut mpsc::Receiver<()>) -> Attempt {
        match AssertUnwindSafe(self.run_once(kill)).catch_unwind().await {
            Ok(attempt) => attempt,
            Err(panic) => {
                lock(&self.process).take();
                let started = self.start_time().unwrap_or_else(SystemTime::now);
                let mut result = JobResult::new(&self.cmd, JobState::Error);
                result.critical = format!("PANIC({})", panic_message(&*panic));
                result.stamp(started, started.elapsed().unwrap_or_default());
                warn!(target: "zpm.core.job", cmd = %self.cmd, critical = %result.critical, "run panicked");
                Attempt {
                    result,
                    spawned: true,
                }
            }
        }
    }

    async fn run_once(&self, kill: &mut mpsc::Receiver<()>) -> Attempt {
        let started = SystemTime::now();
        let clock = Instant::now();
        *lock(&self.start_time) = Some(started);

        let mut result = JobResult::new(&self.cmd, JobState::Error);
        let table: Arc<dyn PidTable> = Arc::new(JobPidTable {
            inner: self.manager.pid_table(),
            hooks: self.hooks.clone(),
        });
        let process = (self.factory)(table, self.cmd.clone());

        let mut rx = match process.run() {
            Ok(rx) => rx,
            Err(e) => {
                warn!(target: "zpm.core.job", cmd = %self.cmd, error = %e, "spawn failed");
                result.data = e.to_string();
                result.stamp(started, clock.elapsed());
                return Attempt {
                    result,
                    spawned: false,
                };
            }
        };
        *lock(&self.process) = Some(Arc::clone(&process));

        let config = self.manager.config();
        let mut stdout = RingBuffer::new(config.stdout_buffer_clamped());
        let mut stderr = RingBuffer::new(config.stdout_buffer_clamped());
        let mut last: Option<Message> = None;
        let mut critical = String::new();

        let timeout = sleep_or_pending(self.cmd.timeout());
        tokio::pin!(timeout);

        let period = config.tick_clamped();
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut meter = self.meter_period().map(|p| {
            let mut i = interval_at(Instant::now() + p, p);
            i.set_missed_tick_behavior(MissedTickBehavior::Delay);
            i
        });

        loop {
            tokio::select! {
                Some(()) = kill.recv() => {
                    debug!(target: "zpm.core.job", cmd = %self.cmd, "killing process");
                    if let Err(e) = process.signal(Signal::SIGTERM) {
                        debug!(target: "zpm.core.job", cmd = %self.cmd, error = %e, "process not signalled");
                    }
                    result.state = JobState::Killed;
                    break;
                }
                _ = &mut timeout => {
                    info!(target: "zpm.core.job", cmd = %self.cmd, "max time exceeded");
                    if let Err(e) = process.signal(Signal::SIGKILL) {
                        debug!(target: "zpm.core.job", cmd = %self.cmd, error = %e, "process not signalled");
                    }
                    result.state = JobState::Timeout;
                    break;
                }
                _ = tick.tick() => hooks::spawn_tick(&self.hooks, clock.elapsed()),
                _ = next_tick(&mut meter) => {
                    if let Some(sample) = process.stats() {
                        self.manager.meter(&self.cmd, &sample);
                    }
                }
                msg = rx.recv() => {
                    let Some(mut msg) = msg else {
                        debug!(target: "zpm.core.job", cmd = %self.cmd, "channel closed without exit message");
                        break;
                    };

                    if self.cmd.stream {
                        msg.meta.set(Meta::STREAM);
                    }
                    self.manager.msg_callback(&self.cmd, &mut msg);
                    lock(&self.backlog).append(msg.clone());

                    let level = msg.level();
                    if msg.meta.is(Meta::EXIT_SUCCESS) {
                        result.state = JobState::Success;
                    } else if msg.meta.is(Meta::EXIT_ERROR) {
                        result.state = JobState::Error;
                    } else if level.is_result() {
                        last = Some(msg.clone());
                    } else if level == Level::STDOUT {
                        stdout.append(msg.message.clone());
                    } else if level == Level::STDERR {
                        stderr.append(msg.message.clone());
                    } else if level == Level::CRITICAL {
                        critical = msg.message.clone();
                    }

                    hooks::spawn_message(&self.hooks, &msg);
                    self.notify_subscribers(&msg);

                    if msg.meta.is_exit() {
                        break;
                    }
                }
            }
        }

        let escalate = result.state == JobState::Killed;
        drain(&self.cmd, &mut rx, process.as_ref(), escalate).await;
        lock(&self.process).take();

        if let Some(msg) = last {
            result.level = msg.level();
            result.data = msg.message;
        }
        result.streams = Streams(join_lines(&stdout), join_lines(&stderr));
        result.critical = critical;
        result.stamp(started, clock.elapsed());

        Attempt {
            result,
            spawned: true,
        }
    }

    fn meter_period(&self) -> Option<Duration> {
        if self.cmd.stats_interval.is_zero() {
            self.manager.config().default_stats_interval()
        } else {
            Some(self.cmd.stats_interval)
        }
    }

    fn notify_subscribers(&self, msg: &Message) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sub in &subscribers {
            deliver(&self.cmd, sub, msg);
        }
    }
}

fn deliver(cmd: &Command, sub: &Subscriber, msg: &Message) {
    if catch_unwind(AssertUnwindSafe(|| sub(msg))).is_err() {
        warn!(target: "zpm.core.job", cmd = %cmd, "subscriber panicked");
    }
}

/// Consumes the channel to its end so the process can finish its cleanup.
async fn drain(cmd: &Command, rx: &mut mpsc::Receiver<Message>, process: &dyn Process, escalate: bool) {
    let drained = async {
        let mut n = 0usize;
        while rx.recv().await.is_some() {
            n += 1;
        }
        n
    };
    tokio::pin!(drained);

    if escalate {
        match tokio::time::timeout(KILL_GRACE, &mut drained).await {
            Ok(n) => {
                trace!(target: "zpm.core.job", cmd = %cmd, dropped = n, "channel drained");
                return;
            }
            Err(_) => {
                warn!(target: "zpm.core.job", cmd = %cmd, "process ignored SIGTERM, sending SIGKILL");
                let _ = process.signal(Signal::SIGKILL);
            }
        }
    }

    let n = drained.await;
    trace!(target: "zpm.core.job", cmd = %cmd, dropped = n, "channel drained");
}

async fn sleep_or_pending(d: Option<Duration>) {
    match d {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// PID table view of a job: fires PID hooks once a spawn registers.
struct JobPidTable {
    inner: Arc<dyn PidTable>,
    hooks: Vec<HookRef>,
}

#[async_trait]
impl PidTable for JobPidTable {
    fn register(&self, spawn: &mut dyn FnMut() -> io::Result<i32>) -> io::Result<i32> {
        let pid = self.inner.register(spawn)?;
        hooks::spawn_pid(&self.hooks, pid);
        Ok(pid)
    }

    async fn wait_pid(&self, pid: i32) -> WaitStatus {
        self.inner.wait_pid(pid).await
    }
}
