//! Lifecycle observers attached to a single job.
//!
//! Every callback runs in its own tokio task, so a slow or panicking hook
//! never stalls the job that fired it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use zpm_model::{JobState, Message};

/// Observer of job lifecycle events; every method defaults to a no-op.
pub trait Hook: Send + Sync {
    /// Periodic tick with the time elapsed since the current run started.
    fn tick(&self, _elapsed: Duration) {}

    /// Every message the process produces.
    fn message(&self, _msg: &Message) {}

    /// The OS PID became known.
    fn pid(&self, _pid: i32) {}

    /// A run reached its terminal state.
    fn exit(&self, _state: JobState) {}
}

pub type HookRef = Arc<dyn Hook>;

/// Fires once per spawned OS process with its PID.
pub struct PidHook {
    action: Box<dyn Fn(i32) + Send + Sync>,
}

impl PidHook {
    pub fn new(action: impl Fn(i32) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            action: Box::new(action),
        })
    }
}

impl Hook for PidHook {
    fn pid(&self, pid: i32) {
        (self.action)(pid)
    }
}

/// Fires once per run with `true` on success.
pub struct ExitHook {
    action: Box<dyn Fn(bool) + Send + Sync>,
}

impl ExitHook {
    pub fn new(action: impl Fn(bool) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            action: Box::new(action),
        })
    }
}

impl Hook for ExitHook {
    fn exit(&self, state: JobState) {
        (self.action)(state.is_success())
    }
}

/// Fires once if a run is still alive after `delay`.
pub struct DelayHook {
    delay: Duration,
    fired: AtomicBool,
    action: Box<dyn Fn() + Send + Sync>,
}

impl DelayHook {
    pub fn new(delay: Duration, action: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fired: AtomicBool::new(false),
            action: Box::new(action),
        })
    }
}

impl Hook for DelayHook {
    fn tick(&self, elapsed: Duration) {
        if elapsed >= self.delay && !self.fired.swap(true, Ordering::AcqRel) {
            (self.action)()
        }
    }
}

/// Fires on the first message containing `pattern`.
pub struct MatchHook {
    pattern: String,
    fired: AtomicBool,
    action: Box<dyn Fn(&Message) + Send + Sync>,
}

impl MatchHook {
    pub fn new(
        pattern: impl Into<String>,
        action: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            pattern: pattern.into(),
            fired: AtomicBool::new(false),
            action: Box::new(action),
        })
    }
}

impl Hook for MatchHook {
    fn message(&self, msg: &Message) {
        if msg.message.contains(&self.pattern) && !self.fired.swap(true, Ordering::AcqRel) {
            (self.action)(msg)
        }
    }
}

pub(crate) fn spawn_tick(hooks: &[HookRef], elapsed: Duration) {
    for hook in hooks {
        let hook = Arc::clone(hook);
        tokio::spawn(async move { hook.tick(elapsed) });
    }
}

pub(crate) fn spawn_message(hooks: &[HookRef], msg: &Message) {
    if hooks.is_empty() {
        return;
    }
    let msg = Arc::new(msg.clone());
    for hook in hooks {
        let hook = Arc::clone(hook);
        let msg = Arc::clone(&msg);
        tokio::spawn(async move { hook.message(&msg) });
    }
}

pub(crate) fn spawn_pid(hooks: &[HookRef], pid: i32) {
    for hook in hooks {
        let hook = Arc::clone(hook);
        tokio::spawn(async move { hook.pid(pid) });
    }
}

pub(crate) fn spawn_exit(hooks: &[HookRef], state: JobState) {
    for hook in hooks {
        let hook = Arc::clone(hook);
        tokio::spawn(async move { hook.exit(state) });
    }
}
