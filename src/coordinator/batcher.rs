//! Leading-edge chat batching.
//!
//! The first message after a quiet period dispatches immediately and opens
//! a cooldown window; messages arriving inside the window accumulate. At
//! expiry a non-empty buffer flushes as one batch and re-opens the window;
//! an empty buffer closes it. The window deadline itself is owned by the
//! coordinator task; this type only tracks buffer and window state.

use std::collections::{HashMap, VecDeque};

use crate::chat::message::ChatMessage;

/// Messages stamped earlier than startup minus this grace are dropped so a
/// restart never replays an old backlog.
pub const STARTUP_GRACE_MS: i64 = 30_000;

/// Capacity of the short-id lookup index.
pub const RECENT_CAP: usize = 200;

/// Outcome of feeding one message into the batcher.
#[derive(Debug)]
pub enum Ingest {
    /// Message predates the startup grace; not forwarded.
    DroppedStale,
    /// A window is open; the message joined the buffer.
    Buffered,
    /// No window was open; dispatch this batch now and open one.
    Dispatch(Batch),
}

/// A dispatched group of messages.
#[derive(Debug, Clone)]
pub struct Batch {
    pub messages: Vec<ChatMessage>,
}

impl Batch {
    /// Agent-facing prompt for this batch.
    pub fn prompt(&self, now_ms: i64) -> String {
        let n = self.messages.len();
        let noun = if n == 1 { "message" } else { "messages" };
        let oldest = self.messages.iter().map(|m| m.timestamp_ms).min().unwrap_or(now_ms);
        let age_s = ((now_ms - oldest) as f64 / 1000.0).round() as i64;
        let mut out = if age_s > 0 {
            format!("[CRAWD:CHAT - {} {}, {}s]\n", n, noun, age_s)
        } else {
            format!("[CRAWD:CHAT - {} {}]\n", n, noun)
        };
        for msg in &self.messages {
            out.push_str(&msg.prompt_line());
            out.push('\n');
        }
        if n > 1 {
            out.push_str(
                "(To reply to a specific message, prefix with its ID: [msgId] your reply)",
            );
        }
        out.trim_end().to_string()
    }
}

/// FIFO-bounded short-id index of dispatched messages.
#[derive(Debug, Default)]
struct RecentIndex {
    by_short_id: HashMap<String, ChatMessage>,
    order: VecDeque<String>,
}

impl RecentIndex {
    fn insert(&mut self, msg: &ChatMessage) {
        if self.by_short_id.insert(msg.short_id.clone(), msg.clone()).is_none() {
            self.order.push_back(msg.short_id.clone());
        }
        while self.order.len() > RECENT_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.by_short_id.remove(&evicted);
            }
        }
    }

    fn get(&self, short_id: &str) -> Option<&ChatMessage> {
        self.by_short_id.get(short_id)
    }
}

/// Leading-edge throttle over the chat stream.
#[derive(Debug)]
pub struct ChatBatcher {
    started_at_ms: i64,
    window_open: bool,
    buffer: Vec<ChatMessage>,
    recent: RecentIndex,
}

impl ChatBatcher {
    pub fn new(started_at_ms: i64) -> Self {
        Self {
            started_at_ms,
            window_open: false,
            buffer: Vec::new(),
            recent: RecentIndex::default(),
        }
    }

    /// Whether a cooldown window is currently open.
    pub fn window_open(&self) -> bool {
        self.window_open
    }

    /// Feed one message. On `Dispatch` the caller must arm the window
    /// deadline; on `Buffered` a deadline is already armed.
    pub fn ingest(&mut self, msg: ChatMessage) -> Ingest {
        if msg.timestamp_ms < self.started_at_ms - STARTUP_GRACE_MS {
            return Ingest::DroppedStale;
        }
        if self.window_open {
            self.buffer.push(msg);
            return Ingest::Buffered;
        }
        self.window_open = true;
        self.recent.insert(&msg);
        Ingest::Dispatch(Batch {
            messages: vec![msg],
        })
    }

    /// Window expiry. A non-empty buffer flushes and keeps the window
    /// open (the caller re-arms the deadline); an empty buffer closes it.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            self.window_open = false;
            return None;
        }
        let messages = std::mem::take(&mut self.buffer);
        for msg in &messages {
            self.recent.insert(msg);
        }
        Some(Batch { messages })
    }

    /// Look up a dispatched message by its six-character handle.
    pub fn lookup_recent(&self, short_id: &str) -> Option<ChatMessage> {
        self.recent.get(short_id).cloned()
    }
}
