//! Chat adapter trait and adapter-side helpers.
//!
//! Adapters receive messages from an external platform, normalize them to
//! [`ChatMessage`], and push events into the multiplexer over a shared
//! channel. Reconnection policy lives in the multiplexer; deduplication
//! (for sources that replay history on reconnect) lives inside the adapter.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chat::message::{ChatMessage, Platform};
use crate::error::ChannelError;

/// Event emitted by an adapter into the multiplexer.
#[derive(Debug)]
pub enum AdapterEvent {
    /// A normalized chat message.
    Message(ChatMessage),
    /// The adapter established its connection.
    Connected { key: String },
    /// The adapter lost its connection.
    Disconnected { key: String, reason: String },
    /// A non-fatal adapter error.
    Error { key: String, error: String },
}

/// A chat source.
///
/// `connect` must be idempotent: the multiplexer calls it again on every
/// reconnect attempt with the same event sender.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Registry key, e.g. "pumpfun" or "youtube".
    fn key(&self) -> &str;

    /// Platform tag stamped onto normalized messages.
    fn platform(&self) -> Platform;

    /// Open the upstream connection and start emitting events.
    async fn connect(&self, events: mpsc::Sender<AdapterEvent>) -> Result<(), ChannelError>;

    /// Tear down the upstream connection.
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Whether the upstream connection is currently established.
    fn is_connected(&self) -> bool;
}

/// Rolling-window duplicate filter for sources that replay recent history
/// on reconnect (video live chat). Oldest entries are evicted FIFO once
/// the window is full.
#[derive(Debug)]
pub struct DedupWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an id. Returns false if it was already in the window.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.seen.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_rejects_repeat() {
        let mut window = DedupWindow::new(3);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_dedup_evicts_fifo() {
        let mut window = DedupWindow::new(2);
        assert!(window.insert("a"));
        assert!(window.insert("b"));
        assert!(window.insert("c")); // evicts "a"
        assert_eq!(window.len(), 2);
        assert!(window.insert("a")); // "a" is fresh again
        assert!(!window.insert("c"));
    }
}
