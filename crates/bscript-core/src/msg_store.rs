//! Broadcast + history store for kernel output.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{DisplayData, ExecutionResult, KernelMessage, StreamName};

/// Default history size limit (16 MiB).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct StoredMsg {
    msg: KernelMessage,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

/// Output store with broadcast and history support.
///
/// The kernel publishes everything here; the front-end writer follows the
/// live feed while tests and late subscribers read the history.
pub struct MsgStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<KernelMessage>,
}

impl Default for MsgStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgStore {
    /// Create a new message store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(10000);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push a message to both live listeners and history.
    pub fn push(&self, msg: KernelMessage) {
        let _ = self.sender.send(msg.clone()); // live listeners
        let bytes = msg.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push stdout text.
    pub fn push_stdout(&self, s: &str) {
        self.push(KernelMessage::stream(StreamName::Stdout, s));
    }

    /// Push stderr text.
    pub fn push_stderr(&self, s: &str) {
        self.push(KernelMessage::stream(StreamName::Stderr, s));
    }

    /// Push a rich display payload.
    pub fn push_display(&self, display: DisplayData) {
        self.push(KernelMessage::DisplayData(display));
    }

    /// Push a plain-text execution result.
    pub fn push_result(&self, value: &str) {
        let mut data = Map::new();
        data.insert("text/plain".to_string(), Value::String(value.to_string()));
        self.push(KernelMessage::ExecuteResult { data });
    }

    /// Push a progress line.
    pub fn push_progress<S: Into<String>>(&self, s: S) {
        self.push(KernelMessage::Progress { text: s.into() });
    }

    /// Push finished notification.
    pub fn push_finished(&self, result: ExecutionResult) {
        self.push(KernelMessage::Finished(result));
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<KernelMessage> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<KernelMessage> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// Live stream of messages, skipping over lagged gaps.
    #[must_use]
    pub fn live_stream(&self) -> futures::stream::BoxStream<'static, KernelMessage> {
        BroadcastStream::new(self.get_receiver())
            .filter_map(|res| async move {
                match res {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        tracing::warn!("Output subscriber lagged: {e}");
                        None
                    }
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_order() {
        let store = MsgStore::new();
        store.push_stdout("a");
        store.push_stderr("b");
        store.push_finished(ExecutionResult::complete(1));

        let history = store.get_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], KernelMessage::stream(StreamName::Stdout, "a"));
        assert_eq!(history[1], KernelMessage::stream(StreamName::Stderr, "b"));
        assert_eq!(
            history[2],
            KernelMessage::Finished(ExecutionResult::complete(1))
        );
    }

    #[tokio::test]
    async fn test_live_stream_receives_pushes() {
        let store = MsgStore::new();
        let mut live = store.live_stream();
        store.push_result("42");

        let msg = live.next().await.unwrap();
        let KernelMessage::ExecuteResult { data } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(data["text/plain"], "42");
    }
}
