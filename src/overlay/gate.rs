//! Speech turn gate.
//!
//! Each utterance becomes an overlay event with a fresh correlation id;
//! the caller suspends until the overlay acknowledges that playback
//! finished or the hard timeout fires. The timeout is fail-open so a
//! missing overlay can never deadlock the agent. Because the dispatcher
//! serializes turns and every tool call suspends here, at most one
//! utterance is ever in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::coordinator::CoordinatorHandle;
use crate::overlay::bus::{OverlayBus, OverlayEvent, ReplyContext};

/// Hard ceiling on waiting for an overlay ack.
pub const ACK_TIMEOUT_MS: u64 = 60_000;

/// Result of a talk/reply tool call.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SpokenResult {
    pub spoken: bool,
}

/// Gate between the agent's speech tools and the overlay.
#[derive(Clone)]
pub struct SpeechGate {
    bus: OverlayBus,
    coordinator: CoordinatorHandle,
    pending: Arc<RwLock<HashMap<Uuid, oneshot::Sender<()>>>>,
}

impl SpeechGate {
    pub fn new(bus: OverlayBus, coordinator: CoordinatorHandle) -> Self {
        Self {
            bus,
            coordinator,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Speak freely to the stream.
    pub async fn talk(&self, text: &str) -> SpokenResult {
        if text.trim().is_empty() {
            return SpokenResult { spoken: false };
        }
        let id = Uuid::new_v4();
        self.emit_and_wait(
            id,
            OverlayEvent::Talk {
                id,
                message: text.to_string(),
            },
        )
        .await;
        SpokenResult { spoken: true }
    }

    /// Speak in reply to a specific chat message.
    pub async fn reply(&self, text: &str, chat: ReplyContext) -> SpokenResult {
        if text.trim().is_empty() {
            return SpokenResult { spoken: false };
        }
        let id = Uuid::new_v4();
        self.emit_and_wait(
            id,
            OverlayEvent::ReplyTurn {
                id,
                chat,
                bot_message: text.to_string(),
            },
        )
        .await;
        SpokenResult { spoken: true }
    }

    /// Resolve a pending utterance. Returns false for unknown ids
    /// (duplicate acks, acks after timeout).
    pub async fn ack(&self, id: Uuid) -> bool {
        match self.pending.write().await.remove(&id) {
            Some(done) => {
                let _ = done.send(());
                true
            }
            None => false,
        }
    }

    /// Number of utterances awaiting an ack.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    async fn emit_and_wait(&self, id: Uuid, event: OverlayEvent) {
        // Wakes the coordinator if asleep, refreshes activity otherwise.
        self.coordinator.notify_speech().await;

        let (done_tx, done_rx) = oneshot::channel();
        self.pending.write().await.insert(id, done_tx);
        self.bus.publish(event);

        match tokio::time::timeout(Duration::from_millis(ACK_TIMEOUT_MS), done_rx).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("Overlay ack timed out for utterance {}", id);
            }
        }
        // Drop the entry on timeout so a late ack is a no-op.
        let _ = self.pending.write().await.remove(&id);
    }
}
