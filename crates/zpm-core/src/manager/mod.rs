//! # Process manager.
//!
//! [`ProcessManager`] owns the job registry, the named queue, the dispatch
//! loop and the handler lists. Everything that used to be process-wide state
//! lives here, so independent managers can coexist (the PID table is the one
//! exception, see [`SystemPidTable`]).
//!
//! ## Submission paths
//! - [`ProcessManager::run`] starts a job immediately, bypassing admission.
//! - [`ProcessManager::push`] hands the job to the dispatch loop, which admits
//!   at most `max_jobs` at a time and honours named queues.
//!
//! Both paths reject unknown commands and duplicate IDs synchronously and also
//! report the rejection to the result handlers.
//!
//! ## Handlers
//! Handlers are expected to be registered during startup. They are called
//! synchronously from job tasks and must not block; a panicking handler is
//! caught and logged.

mod slice;
mod stats;

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zpm_model::{Command, JobResult, JobState, Level, Message, Stat};

use crate::{
    CoreError, HookRef, Job, ManagerConfig, PidTable, ProcessFactory, ProcessRouter,
    SystemPidTable,
    process::{Builtin, BuiltinWithCtx},
    queue::Queue,
};

/// Receives every message produced by any job.
pub type MessageHandler = Arc<dyn Fn(&Command, &Message) + Send + Sync>;

/// Receives the terminal result of every job, including rejections.
pub type ResultHandler = Arc<dyn Fn(&Command, &JobResult) + Send + Sync>;

/// Receives statsd values and process meter samples.
pub type StatsHandler = Arc<dyn Fn(&Stat) + Send + Sync>;

type Receivers = (mpsc::Receiver<Arc<Job>>, mpsc::Receiver<Arc<Job>>);

#[derive(Default)]
struct Handlers {
    message: RwLock<Vec<MessageHandler>>,
    result: RwLock<Vec<ResultHandler>>,
    stats: RwLock<Vec<StatsHandler>>,
}

fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Supervises commands as jobs.
pub struct ProcessManager {
    config: ManagerConfig,
    router: ProcessRouter,
    table: Arc<dyn PidTable>,

    jobs: Mutex<HashMap<String, Arc<Job>>>,
    queue: Queue<Arc<Job>>,
    immediate: mpsc::Sender<Arc<Job>>,
    rx: Mutex<Option<Receivers>>,
    slots: Option<Arc<Semaphore>>,

    handlers: Handlers,
    cancel: CancellationToken,
}

impl ProcessManager {
    /// Creates a manager backed by the process-wide [`SystemPidTable`].
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        Self::with_table(config, SystemPidTable::global())
    }

    /// Creates a manager backed by `table`.
    pub fn with_table(config: ManagerConfig, table: Arc<dyn PidTable>) -> Arc<Self> {
        let cap = config.submit_capacity_clamped();
        let (immediate, immediate_rx) = mpsc::channel(cap);
        let (ready, ready_rx) = mpsc::channel(cap);
        let slots = config
            .concurrency_limit()
            .map(|n| Arc::new(Semaphore::new(n)));

        info!(target: "zpm.core.manager", max_jobs = config.max_jobs, "process manager created");
        Arc::new(Self {
            config,
            router: ProcessRouter::new(),
            table,
            jobs: Mutex::new(HashMap::new()),
            queue: Queue::new(ready),
            immediate,
            rx: Mutex::new(Some((immediate_rx, ready_rx))),
            slots,
            handlers: Handlers::default(),
            cancel: CancellationToken::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    #[inline]
    pub fn router(&self) -> &ProcessRouter {
        &self.router
    }

    #[inline]
    pub fn pid_table(&self) -> Arc<dyn PidTable> {
        Arc::clone(&self.table)
    }

    /// Registers a process factory. Panics on a duplicate name.
    pub fn register(&self, name: impl Into<String>, factory: ProcessFactory) {
        self.router.register(name, factory);
    }

    pub fn register_builtin(&self, name: impl Into<String>, builtin: Builtin) {
        self.router.register_builtin(name, builtin);
    }

    pub fn register_builtin_with_ctx(&self, name: impl Into<String>, builtin: BuiltinWithCtx) {
        self.router.register_builtin_with_ctx(name, builtin);
    }

    pub fn add_message_handler(&self, handler: MessageHandler) {
        self.handlers
            .message
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn add_result_handler(&self, handler: ResultHandler) {
        self.handlers
            .result
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn add_stats_handler(&self, handler: StatsHandler) {
        self.handlers
            .stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Spawns the dispatch loop. Fails if it was already started.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, CoreError> {
        let (immediate_rx, ready_rx) = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CoreError::Closed)?;

        let pm = Arc::clone(self);
        Ok(tokio::spawn(pm.dispatch(immediate_rx, ready_rx)))
    }

    /// Stops the dispatch loop. Running jobs are left alone.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn dispatch(
        self: Arc<Self>,
        mut immediate: mpsc::Receiver<Arc<Job>>,
        mut ready: mpsc::Receiver<Arc<Job>>,
    ) {
        debug!(target: "zpm.core.manager", "dispatch loop started");
        loop {
            let permit = match &self.slots {
                Some(sem) => tokio::select! {
                    p = Arc::clone(sem).acquire_owned() => match p {
                        Ok(p) => Some(p),
                        Err(_) => break,
                    },
                    _ = self.cancel.cancelled() => break,
                },
                None => None,
            };

            let job = tokio::select! {
                Some(job) = immediate.recv() => job,
                Some(job) = ready.recv() => job,
                _ = self.cancel.cancelled() => break,
                else => break,
            };

            debug!(target: "zpm.core.manager", cmd = %job.command(), "admitted");
            job.set_permit(permit);
            job.start();
        }
        debug!(target: "zpm.core.manager", "dispatch loop stopped");
    }

    /// Starts `cmd` right away, outside admission control and queues.
    #[instrument(level = "debug", skip_all, fields(command = %cmd.command))]
    pub fn run(self: &Arc<Self>, cmd: Command, hooks: Vec<HookRef>) -> Result<Arc<Job>, CoreError> {
        let mut cmd = cmd;
        cmd.ensure_id();
        let factory = self.resolve(&cmd)?;
        let job = self.track(cmd, factory, hooks)?;
        job.start();
        Ok(job)
    }

    /// Starts `cmd` with an explicit factory, skipping the command lookup.
    pub fn run_factory(
        self: &Arc<Self>,
        cmd: Command,
        factory: ProcessFactory,
        hooks: Vec<HookRef>,
    ) -> Result<Arc<Job>, CoreError> {
        let mut cmd = cmd;
        cmd.ensure_id();
        let job = self.track(cmd, factory, hooks)?;
        job.start();
        Ok(job)
    }

    /// Submits `cmd` to the dispatch loop.
    ///
    /// The job is tracked (and its ID reserved) from this point on. The call
    /// waits while the dispatch channels are full.
    #[instrument(level = "debug", skip_all, fields(command = %cmd.command, queue = %cmd.queue))]
    pub async fn push(self: &Arc<Self>, cmd: Command, hooks: Vec<HookRef>) -> Result<Arc<Job>, CoreError> {
        let mut cmd = cmd;
        cmd.ensure_id();
        let factory = self.resolve(&cmd)?;
        let job = self.track(cmd, factory, hooks)?;

        let sent = if job.command().is_queued() {
            self.queue.push(&job.command().queue, Arc::clone(&job)).await
        } else {
            self.immediate
                .send(Arc::clone(&job))
                .await
                .map_err(|_| CoreError::Closed)
        };

        if let Err(e) = sent {
            self.untrack(&job);
            return Err(e);
        }
        Ok(job)
    }

    fn resolve(&self, cmd: &Command) -> Result<ProcessFactory, CoreError> {
        self.router.get(&cmd.command).ok_or_else(|| {
            let err = CoreError::UnknownCommand(cmd.command.clone());
            error!(target: "zpm.core.manager", cmd = %cmd, "unknown command");
            self.reject(cmd, JobState::UnknownCommand, &err);
            err
        })
    }

    /// Inserts a new job unless the ID is already tracked.
    fn track(
        self: &Arc<Self>,
        cmd: Command,
        factory: ProcessFactory,
        hooks: Vec<HookRef>,
    ) -> Result<Arc<Job>, CoreError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&cmd.id) {
            drop(jobs);
            let err = CoreError::DuplicateId(cmd.id.clone());
            error!(target: "zpm.core.manager", cmd = %cmd, "duplicate job id");
            self.reject(&cmd, JobState::DuplicateId, &err);
            return Err(err);
        }

        let job = Job::new(Arc::clone(self), cmd, factory, hooks);
        jobs.insert(job.command().id.clone(), Arc::clone(&job));
        Ok(job)
    }

    fn reject(&self, cmd: &Command, state: JobState, err: &CoreError) {
        let mut result = JobResult::new(cmd, state).with_data(err.to_string());
        result.stamp(SystemTime::now(), std::time::Duration::ZERO);
        self.result_callback(cmd, &mut result);
    }

    /// Removes `job` from the registry if it is still the tracked instance.
    pub(crate) fn untrack(&self, job: &Job) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let id = &job.command().id;
        if jobs.get(id).is_some_and(|j| std::ptr::eq(Arc::as_ptr(j), job)) {
            jobs.remove(id);
        }
    }

    /// Releases the next job of the queue `name`.
    pub(crate) async fn queue_notify(&self, name: &str) {
        if let Err(e) = self.queue.notify(name).await {
            warn!(target: "zpm.core.manager", queue = name, error = %e, "queue notify failed");
        }
    }

    /// Looks up a tracked job.
    pub fn job(&self, id: &str) -> Option<Arc<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).cloned()
    }

    /// Snapshot of every tracked job (running, queued, or in backoff).
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.values().cloned().collect()
    }

    /// Terminates the job with the given ID.
    pub fn kill(&self, id: &str) -> Result<(), CoreError> {
        let job = self.job(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        job.terminate();
        Ok(())
    }

    /// Terminates every tracked job.
    pub fn kill_all(&self) {
        for job in self.jobs() {
            job.terminate();
        }
    }

    /// Stamps `msg`, extracts statsd values and fans it out to the message handlers.
    pub(crate) fn msg_callback(&self, cmd: &Command, msg: &mut Message) {
        msg.epoch = epoch_nanos();

        if msg.level() == Level::STATSD {
            match Stat::parse_statsd(&msg.message, &cmd.id) {
                Some(stat) => self.aggregate(&stat),
                None => warn!(
                    target: "zpm.core.manager",
                    id = %cmd.id,
                    line = %msg.message,
                    "invalid statsd line, expecting key:value|op[|tags]"
                ),
            }
        }

        if cmd.flags.no_output {
            return;
        }
        for handler in snapshot(&self.handlers.message) {
            if catch_unwind(AssertUnwindSafe(|| handler(cmd, msg))).is_err() {
                warn!(target: "zpm.core.manager", id = %cmd.id, "message handler panicked");
            }
        }
    }

    /// Copies command tags onto `result` and calls every result handler.
    pub(crate) fn result_callback(&self, cmd: &Command, result: &mut JobResult) {
        result.tags = cmd.tags.clone();
        for handler in snapshot(&self.handlers.result) {
            if catch_unwind(AssertUnwindSafe(|| handler(cmd, result))).is_err() {
                warn!(target: "zpm.core.manager", id = %cmd.id, "result handler panicked");
            }
        }
    }

    /// Forwards one stat to every stats handler.
    pub fn aggregate(&self, stat: &Stat) {
        for handler in snapshot(&self.handlers.stats) {
            if catch_unwind(AssertUnwindSafe(|| handler(stat))).is_err() {
                warn!(target: "zpm.core.manager", key = %stat.key, "stats handler panicked");
            }
        }
    }
}

/// Nanoseconds since the UNIX epoch.
pub(crate) fn epoch_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
