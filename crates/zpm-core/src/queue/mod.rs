//! Named FIFO serializer.
//!
//! Items sharing a non-empty queue name are released to the ready channel one
//! at a time, in push order. The head of a list is the item currently in
//! flight; [`Queue::notify`] retires it and releases the next one.
//!
//! Sends happen while the map lock is held, so a stalled consumer of the
//! ready channel stalls `push` and `notify` too instead of reordering items.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use crate::CoreError;

pub struct Queue<T> {
    lists: Mutex<HashMap<String, VecDeque<T>>>,
    ready: mpsc::Sender<T>,
}

impl<T: Clone + Send> Queue<T> {
    pub fn new(ready: mpsc::Sender<T>) -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
            ready,
        }
    }

    /// Enqueues `item` under `name`; an empty name releases it immediately.
    pub async fn push(&self, name: &str, item: T) -> Result<(), CoreError> {
        let mut lists = self.lists.lock().await;
        if name.is_empty() {
            return self.ready.send(item).await.map_err(|_| CoreError::Closed);
        }

        let list = lists.entry(name.to_string()).or_default();
        list.push_back(item.clone());
        trace!(target: "zpm.core.queue", queue = name, depth = list.len(), "pushed");

        if list.len() == 1 {
            self.ready.send(item).await.map_err(|_| CoreError::Closed)?;
        }
        Ok(())
    }

    /// Retires the head of `name` and releases the next item, if any.
    pub async fn notify(&self, name: &str) -> Result<(), CoreError> {
        if name.is_empty() {
            return Ok(());
        }

        let mut lists = self.lists.lock().await;
        let Some(list) = lists.get_mut(name) else {
            return Ok(());
        };

        list.pop_front();
        match list.front().cloned() {
            Some(next) => {
                trace!(target: "zpm.core.queue", queue = name, depth = list.len(), "release next");
                self.ready.send(next).await.map_err(|_| CoreError::Closed)
            }
            None => {
                lists.remove(name);
                Ok(())
            }
        }
    }

    /// Number of items waiting or in flight under `name`.
    pub async fn depth(&self, name: &str) -> usize {
        self.lists.lock().await.get(name).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<&'static str>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn unnamed_items_pass_through() {
        let (tx, mut rx) = mpsc::channel(8);
        let q = Queue::new(tx);

        q.push("", "a").await.unwrap();
        q.push("", "b").await.unwrap();
        assert_eq!(drain(&mut rx), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn named_items_release_one_at_a_time() {
        let (tx, mut rx) = mpsc::channel(8);
        let q = Queue::new(tx);

        q.push("q", "1").await.unwrap();
        q.push("q", "2").await.unwrap();
        q.push("q", "3").await.unwrap();
        q.push("other", "x").await.unwrap();
        assert_eq!(drain(&mut rx), vec!["1", "x"]);
        assert_eq!(q.depth("q").await, 3);

        q.notify("q").await.unwrap();
        assert_eq!(drain(&mut rx), vec!["2"]);
        q.notify("q").await.unwrap();
        assert_eq!(drain(&mut rx), vec!["3"]);
        q.notify("q").await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(q.depth("q").await, 0);
    }

    #[tokio::test]
    async fn queue_is_recreated_after_emptying() {
        let (tx, mut rx) = mpsc::channel(8);
        let q = Queue::new(tx);

        q.push("q", "1").await.unwrap();
        q.notify("q").await.unwrap();
        q.push("q", "2").await.unwrap();
        assert_eq!(drain(&mut rx), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn notify_unknown_name_is_noop() {
        let (tx, mut rx) = mpsc::channel::<&'static str>(8);
        let q = Queue::new(tx);

        q.notify("missing").await.unwrap();
        q.notify("").await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn closed_ready_channel_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let q = Queue::new(tx);
        assert!(matches!(q.push("", "a").await, Err(CoreError::Closed)));
    }
}
