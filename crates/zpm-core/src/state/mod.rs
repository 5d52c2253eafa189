use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use futures::{StreamExt, stream::FuturesUnordered};
use tokio::sync::watch;
use tracing::trace;

/// One-shot release flags keyed by ID.
///
/// Every ID is released exactly once with a success flag; waiters observe
/// the flag as soon as it is set, and late waiters see it immediately.
pub struct StateMachine {
    states: Mutex<HashMap<String, watch::Sender<Option<bool>>>>,
}

impl StateMachine {
    /// Creates a machine tracking `ids`, all pending.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = ids
            .into_iter()
            .map(|id| (id.into(), watch::Sender::new(None)))
            .collect();
        Self {
            states: Mutex::new(states),
        }
    }

    /// Releases `id` with `ok`. The first release wins; later ones are ignored.
    ///
    /// Returns `true` if this call set the flag.
    pub fn release(&self, id: &str, ok: bool) -> bool {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = states.get(id) else {
            return false;
        };

        let set = tx.send_if_modified(|v| {
            if v.is_none() {
                *v = Some(ok);
                true
            } else {
                false
            }
        });
        if set {
            trace!(target: "zpm.core.state", id, ok, "released");
        }
        set
    }

    /// Current flag of `id`: `None` if unknown, `Some(None)` while pending.
    pub fn get(&self, id: &str) -> Option<Option<bool>> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(id).map(|tx| *tx.borrow())
    }

    /// Waits until every ID in `ids` is released.
    ///
    /// Returns `true` only if all of them succeeded. Returns `false` as soon
    /// as one fails; unknown IDs count as failed.
    pub async fn wait<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        let mut receivers = Vec::with_capacity(ids.len());
        {
            let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            for id in ids {
                match states.get(id.as_ref()) {
                    Some(tx) => receivers.push(tx.subscribe()),
                    None => return false,
                }
            }
        }

        let mut pending: FuturesUnordered<_> = receivers
            .into_iter()
            .map(|mut rx| async move {
                match rx.wait_for(Option::is_some).await {
                    Ok(v) => *v == Some(true),
                    Err(_) => false,
                }
            })
            .collect();

        while let Some(ok) = pending.next().await {
            if !ok {
                return false;
            }
        }
        true
    }

    /// Waits until every tracked ID is released; returns `true` if all succeeded.
    pub async fn wait_all(&self) -> bool {
        let ids: Vec<String> = {
            let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            states.keys().cloned().collect()
        };

        let mut all = true;
        for id in &ids {
            all &= self.wait(std::slice::from_ref(id)).await;
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{sync::Arc, time::Duration};

    #[test]
    fn first_release_wins() {
        let sm = StateMachine::new(["a"]);
        assert_eq!(sm.get("a"), Some(None));
        assert!(sm.release("a", true));
        assert!(!sm.release("a", false));
        assert_eq!(sm.get("a"), Some(Some(true)));
        assert_eq!(sm.get("b"), None);
        assert!(!sm.release("b", true));
    }

    #[tokio::test]
    async fn wait_sees_late_and_early_releases() {
        let sm = Arc::new(StateMachine::new(["a", "b"]));
        sm.release("a", true);

        let waiter = {
            let sm = Arc::clone(&sm);
            tokio::spawn(async move { sm.wait(&["a", "b"]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        sm.release("b", true);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn failure_short_circuits() {
        let sm = StateMachine::new(["a", "b"]);
        sm.release("b", false);
        // "a" stays pending forever; the failed "b" must still end the wait
        let ok = tokio::time::timeout(Duration::from_secs(1), sm.wait(&["a", "b"]))
            .await
            .expect("wait should not block");
        assert!(!ok);
    }

    #[tokio::test]
    async fn unknown_ids_fail() {
        let sm = StateMachine::new(["a"]);
        assert!(!sm.wait(&["nope"]).await);
        assert!(sm.wait::<&str>(&[]).await);
    }

    #[tokio::test]
    async fn wait_all_reports_any_failure() {
        let sm = StateMachine::new(["a", "b"]);
        sm.release("a", true);
        sm.release("b", false);
        assert!(!sm.wait_all().await);
    }
}
