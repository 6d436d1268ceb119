//! Overlay event bus.
//!
//! Server-to-subscriber events fan out over a `tokio::sync::broadcast`
//! channel; the WebSocket endpoint in the HTTP server forwards them to
//! every connected overlay. Broadcast is best-effort: a slow subscriber
//! lags and drops, it never backpressures the coordinator.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::chat::message::ChatMessage;

const BUS_CAPACITY: usize = 256;

/// Status tag published on `crawd:status`. The machine states plus
/// transient activity hints (`vibing`, `chatting`, `planning`) that carry
/// no state-machine meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTag {
    Sleep,
    Idle,
    Active,
    Vibing,
    Chatting,
    Planning,
}

/// Plan lifecycle notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanEventType {
    Created,
    Completed,
    Abandoned,
}

/// Reply context attached to a `reply-turn` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContext {
    pub username: String,
    pub message: String,
}

/// Server-to-subscriber overlay event, wire-framed as
/// `{"channel": "...", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload")]
pub enum OverlayEvent {
    #[serde(rename = "crawd:talk")]
    Talk { id: Uuid, message: String },
    #[serde(rename = "crawd:reply-turn", rename_all = "camelCase")]
    ReplyTurn {
        id: Uuid,
        chat: ReplyContext,
        bot_message: String,
    },
    #[serde(rename = "crawd:chat")]
    Chat(ChatMessage),
    #[serde(rename = "crawd:status")]
    Status { status: StatusTag },
    #[serde(rename = "crawd:mcap")]
    Mcap { mcap: f64 },
    #[serde(rename = "crawd:plan", rename_all = "camelCase")]
    Plan {
        #[serde(rename = "type")]
        event_type: PlanEventType,
        plan_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        goal: Option<String>,
    },
}

/// Subscriber-to-server frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "channel", content = "payload")]
pub enum SubscriberFrame {
    /// Audio playback for an utterance finished.
    #[serde(rename = "crawd:talk:done")]
    TalkDone { id: Uuid },
    /// Test fixture: inject a chat message.
    #[serde(rename = "crawd:mock-chat")]
    MockChat { username: String, message: String },
}

/// Fan-out handle for overlay events.
#[derive(Clone)]
pub struct OverlayBus {
    tx: broadcast::Sender<OverlayEvent>,
}

impl OverlayBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish to every subscriber. No receivers is fine.
    pub fn publish(&self, event: OverlayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for OverlayBus {
    fn default() -> Self {
        Self::new()
    }
}
