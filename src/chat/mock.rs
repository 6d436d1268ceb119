//! In-process chat adapter used by tests and local fixtures.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::chat::adapter::{AdapterEvent, ChatAdapter};
use crate::chat::message::{ChatMessage, Platform};
use crate::error::ChannelError;

/// An adapter fed by hand instead of a network connection.
pub struct MockAdapter {
    key: String,
    connected: AtomicBool,
    events: RwLock<Option<mpsc::Sender<AdapterEvent>>>,
}

impl MockAdapter {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            connected: AtomicBool::new(false),
            events: RwLock::new(None),
        }
    }

    /// Inject a message as if it arrived from the platform.
    pub async fn push(&self, username: &str, body: &str) {
        let msg = ChatMessage::new(Platform::Pumpfun, username, body);
        self.push_message(msg).await;
    }

    /// Inject a pre-built message.
    pub async fn push_message(&self, msg: ChatMessage) {
        let guard = self.events.read().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(AdapterEvent::Message(msg)).await;
        }
    }

    /// Simulate an upstream disconnect.
    pub async fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let guard = self.events.read().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx
                .send(AdapterEvent::Disconnected {
                    key: self.key.clone(),
                    reason: reason.to_string(),
                })
                .await;
        }
    }
}

#[async_trait]
impl ChatAdapter for MockAdapter {
    fn key(&self) -> &str {
        &self.key
    }

    fn platform(&self) -> Platform {
        Platform::Pumpfun
    }

    async fn connect(&self, events: mpsc::Sender<AdapterEvent>) -> Result<(), ChannelError> {
        let _ = events
            .send(AdapterEvent::Connected {
                key: self.key.clone(),
            })
            .await;
        *self.events.write().await = Some(events);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.connected.store(false, Ordering::SeqCst);
        *self.events.write().await = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
