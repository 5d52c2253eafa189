use std::sync::Arc;

use tracing::{error, info, warn};
use zpm_model::Startup;

use crate::{ProcessManager, StateMachine, map};

impl ProcessManager {
    /// Starts a slice of services honouring their `after` dependencies.
    ///
    /// Each entry starts once all its dependencies are released successfully,
    /// either by exiting with success or by being considered up (output match or
    /// delay). An entry whose dependency failed, or names an ID outside the
    /// slice, is released as failed without being started.
    ///
    /// Resolves once every entry is released; returns `true` if all succeeded.
    pub async fn run_slice(self: &Arc<Self>, slice: &[Startup]) -> bool {
        let states = Arc::new(StateMachine::new(slice.iter().map(|up| up.key().to_string())));

        for up in slice {
            let up = up.clone();
            let pm = Arc::clone(self);
            let states = Arc::clone(&states);

            tokio::spawn(async move {
                let cmd = map::to_command(&up);
                if !up.after.is_empty() {
                    info!(target: "zpm.core.slice", cmd = %cmd, after = ?up.after, "waiting for dependencies");
                }

                if !states.wait(&up.after).await {
                    error!(target: "zpm.core.slice", cmd = %cmd, "a dependency failed, not starting");
                    states.release(up.key(), false);
                    return;
                }

                info!(target: "zpm.core.slice", cmd = %cmd, "starting");
                let hooks = map::release_hooks(&up, &states);
                if let Err(e) = pm.run(cmd, hooks) {
                    warn!(target: "zpm.core.slice", id = %up.key(), error = %e, "failed to start");
                    states.release(up.key(), false);
                }
            });
        }

        info!(target: "zpm.core.slice", entries = slice.len(), "waiting for the slice to boot");
        states.wait_all().await
    }
}
