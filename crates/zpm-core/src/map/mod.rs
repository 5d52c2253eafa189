//! Mapping of startup descriptors onto commands and release hooks.

use std::sync::Arc;

use tracing::info;
use zpm_model::{Command, Startup};

use crate::{DelayHook, ExitHook, HookRef, MatchHook, StateMachine};

/// Builds the command a startup entry runs.
pub fn to_command(up: &Startup) -> Command {
    let mut cmd = Command::new(up.name.clone())
        .with_id(up.key())
        .with_max_restart(up.max_restart)
        .with_recurring_period(up.recurring_period);
    cmd.arguments = up.args.clone();
    cmd.flags.protected = up.protected;
    cmd
}

/// Hooks that release the entry in `states` once it is considered up.
///
/// A `running_match` takes precedence over the delay heuristic. An exit hook
/// is always attached, so an entry that exits early is still released.
pub fn release_hooks(up: &Startup, states: &Arc<StateMachine>) -> Vec<HookRef> {
    let key = up.key().to_string();
    let mut hooks: Vec<HookRef> = Vec::with_capacity(2);

    if let Some(pattern) = up.running_match.as_deref().filter(|p| !p.is_empty()) {
        let (states, id) = (Arc::clone(states), key.clone());
        hooks.push(MatchHook::new(pattern, move |msg| {
            info!(target: "zpm.core.slice", id = %id, line = %msg.message, "running match");
            states.release(&id, true);
        }));
    } else if let Some(delay) = up.running_delay() {
        let (states, id) = (Arc::clone(states), key.clone());
        hooks.push(DelayHook::new(delay, move || {
            states.release(&id, true);
        }));
    }

    let states = Arc::clone(states);
    hooks.push(ExitHook::new(move |ok| {
        states.release(&key, ok);
    }));
    hooks
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use zpm_model::{JobState, Level, Message};

    #[test]
    fn command_carries_policies() {
        let mut up = Startup::new("core.system").with_id("sshd");
        up.protected = true;
        up.max_restart = 3;
        up.recurring_period = Duration::from_secs(10);

        let cmd = to_command(&up);
        assert_eq!(cmd.id, "sshd");
        assert_eq!(cmd.command, "core.system");
        assert_eq!(cmd.max_restart, 3);
        assert_eq!(cmd.recurring(), Some(Duration::from_secs(10)));
        assert!(cmd.flags.protected);
    }

    #[test]
    fn match_takes_precedence_over_delay() {
        let states = Arc::new(StateMachine::new(["svc"]));
        let up = Startup::new("svc").with_running_match("listening");
        let hooks = release_hooks(&up, &states);
        assert_eq!(hooks.len(), 2);

        hooks[0].tick(Duration::from_secs(60));
        assert_eq!(states.get("svc"), Some(None));

        hooks[0].message(&Message::new(Level::STDOUT, "listening on 6379"));
        assert_eq!(states.get("svc"), Some(Some(true)));
    }

    #[test]
    fn delay_releases_a_running_entry() {
        let states = Arc::new(StateMachine::new(["svc"]));
        let up = Startup::new("svc").with_running_delay(1);
        let hooks = release_hooks(&up, &states);

        hooks[0].tick(Duration::from_millis(500));
        assert_eq!(states.get("svc"), Some(None));
        hooks[0].tick(Duration::from_secs(1));
        assert_eq!(states.get("svc"), Some(Some(true)));
    }

    #[test]
    fn disabled_delay_waits_for_exit() {
        let states = Arc::new(StateMachine::new(["svc"]));
        let up = Startup::new("svc").with_running_delay(-1);
        let hooks = release_hooks(&up, &states);
        assert_eq!(hooks.len(), 1);

        hooks[0].exit(JobState::Error);
        assert_eq!(states.get("svc"), Some(Some(false)));
    }
}
