use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use zpm_model::{Command, Level, Message};

use crate::{CoreError, Process};

/// Synchronous in-runtime function.
pub type Builtin = Arc<dyn Fn(&Command) -> anyhow::Result<Value> + Send + Sync>;

/// Asynchronous in-runtime function that observes cancellation.
pub type BuiltinWithCtx = Arc<dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Invocation context handed to a [`BuiltinWithCtx`].
#[derive(Clone, Debug)]
pub struct Context {
    pub command: Command,
    /// Cancelled when the job is killed or times out.
    pub cancel: CancellationToken,
}

#[derive(Clone)]
enum Body {
    Sync(Builtin),
    Ctx(BuiltinWithCtx),
}

/// Process variant that calls a registered function instead of spawning.
///
/// The function's return value becomes a single result message
/// (`RESULT_JSON`, or `RESULT_ERROR` with the error text) followed by the exit
/// message.
pub struct InternalProcess {
    cmd: Command,
    body: Body,
    cancel: CancellationToken,
}

impl InternalProcess {
    pub fn new(cmd: Command, builtin: Builtin) -> Self {
        Self {
            cmd,
            body: Body::Sync(builtin),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_ctx(cmd: Command, builtin: BuiltinWithCtx) -> Self {
        Self {
            cmd,
            body: Body::Ctx(builtin),
            cancel: CancellationToken::new(),
        }
    }

    /// Wraps an async closure into a [`BuiltinWithCtx`].
    pub fn boxed<F, Fut>(f: F) -> BuiltinWithCtx
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Arc::new(move |ctx| Box::pin(f(ctx)))
    }
}

impl Process for InternalProcess {
    fn command(&self) -> &Command {
        &self.cmd
    }

    fn run(&self) -> Result<mpsc::Receiver<Message>, CoreError> {
        let (tx, rx) = mpsc::channel(2);
        let cmd = self.cmd.clone();
        let body = self.body.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            trace!(target: "zpm.core.internal", id = %cmd.id, command = %cmd.command, "call builtin");
            let outcome = match body {
                Body::Sync(f) => {
                    let cmd = cmd.clone();
                    tokio::task::spawn_blocking(move || f(&cmd)).await
                }
                Body::Ctx(f) => tokio::spawn(f(Context { command: cmd.clone(), cancel })).await,
            };

            for msg in into_messages(outcome) {
                if tx.send(msg).await.is_err() {
                    debug!(target: "zpm.core.internal", id = %cmd.id, "receiver dropped");
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Any signal cancels the context of a [`BuiltinWithCtx`].
    fn signal(&self, _sig: nix::sys::signal::Signal) -> Result<(), CoreError> {
        match self.body {
            Body::Ctx(_) => {
                self.cancel.cancel();
                Ok(())
            }
            Body::Sync(_) => Err(CoreError::NotSignalable),
        }
    }
}

fn into_messages(outcome: Result<anyhow::Result<Value>, JoinError>) -> [Message; 2] {
    match outcome {
        Ok(Ok(value)) => {
            let payload = serde_json::to_string(&value).unwrap_or_else(|e| e.to_string());
            [Message::new(Level::RESULT_JSON, payload), Message::exit_success()]
        }
        Ok(Err(e)) => [
            Message::new(Level::RESULT_ERROR, format!("{e:#}")),
            Message::exit_error(),
        ],
        Err(e) => [
            Message::new(Level::RESULT_ERROR, format!("builtin aborted: {e}")),
            Message::exit_error(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use nix::sys::signal::Signal;
    use serde_json::json;
    use zpm_model::Meta;

    async fn collect(mut rx: mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(m) = rx.recv().await {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn value_becomes_json_result() {
        let f: Builtin = Arc::new(|cmd: &Command| -> anyhow::Result<Value> { Ok(json!({"id": cmd.id})) });
        let p = InternalProcess::new(Command::new("t").with_id("x"), f);

        let msgs = collect(p.run().unwrap()).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].level(), Level::RESULT_JSON);
        assert_eq!(msgs[0].message, r#"{"id":"x"}"#);
        assert!(msgs[1].meta.is(Meta::EXIT_SUCCESS));
    }

    #[tokio::test]
    async fn error_becomes_error_result() {
        let f: Builtin = Arc::new(|_: &Command| -> anyhow::Result<Value> { Err(anyhow::anyhow!("boom")) });
        let p = InternalProcess::new(Command::new("t"), f);

        let msgs = collect(p.run().unwrap()).await;
        assert_eq!(msgs[0].level(), Level::RESULT_ERROR);
        assert_eq!(msgs[0].message, "boom");
        assert!(msgs[1].meta.is(Meta::EXIT_ERROR));
    }

    #[tokio::test]
    async fn panic_becomes_error_result() {
        let f: Builtin = Arc::new(|_: &Command| -> anyhow::Result<Value> { panic!("bad builtin") });
        let p = InternalProcess::new(Command::new("t"), f);

        let msgs = collect(p.run().unwrap()).await;
        assert_eq!(msgs[0].level(), Level::RESULT_ERROR);
        assert!(msgs[1].meta.is(Meta::EXIT_ERROR));
    }

    #[tokio::test]
    async fn signal_cancels_ctx_builtin() {
        let f = InternalProcess::boxed(|ctx: Context| async move {
            ctx.cancel.cancelled().await;
            Err::<Value, _>(anyhow::anyhow!("cancelled"))
        });
        let p = InternalProcess::with_ctx(Command::new("t"), f);
        let rx = p.run().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        p.signal(Signal::SIGTERM).unwrap();

        let msgs = collect(rx).await;
        assert_eq!(msgs[0].message, "cancelled");
        assert!(msgs[1].meta.is(Meta::EXIT_ERROR));
    }

    #[test]
    fn sync_builtin_is_not_signalable() {
        let f: Builtin = Arc::new(|_: &Command| -> anyhow::Result<Value> { Ok(Value::Null) });
        let p = InternalProcess::new(Command::new("t"), f);
        assert!(matches!(p.signal(Signal::SIGTERM), Err(CoreError::NotSignalable)));
    }
}
