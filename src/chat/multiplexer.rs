//! Chat source multiplexer.
//!
//! Holds the registered adapters, fans their normalized messages into a
//! single channel, and supervises reconnection: exponential backoff from
//! 5 s doubling to a 60 s cap, giving up after 5 attempts. A `Connected`
//! event clears the retry state for that adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use crate::chat::adapter::{AdapterEvent, ChatAdapter};
use crate::chat::message::ChatMessage;

const RECONNECT_BASE_MS: u64 = 5_000;
const RECONNECT_MAX_MS: u64 = 60_000;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Registry of chat adapters with reconnect supervision.
pub struct ChatSources {
    adapters: Arc<RwLock<HashMap<String, Arc<dyn ChatAdapter>>>>,
    events_tx: mpsc::Sender<AdapterEvent>,
}

impl ChatSources {
    /// Create the multiplexer and spawn its supervision task. Normalized
    /// messages are forwarded to `messages_tx` in arrival order.
    pub fn new(messages_tx: mpsc::Sender<ChatMessage>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        let adapters: Arc<RwLock<HashMap<String, Arc<dyn ChatAdapter>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(supervise(
            Arc::clone(&adapters),
            events_tx.clone(),
            events_rx,
            messages_tx,
        ));

        Self { adapters, events_tx }
    }

    /// Register an adapter under its key. Last registration wins.
    pub async fn register(&self, adapter: Arc<dyn ChatAdapter>) {
        let key = adapter.key().to_string();
        self.adapters.write().await.insert(key.clone(), adapter);
        tracing::debug!("Registered chat adapter: {}", key);
    }

    /// Connect every registered adapter. Failures are logged per adapter
    /// and retried by the supervisor; one bad source never blocks the rest.
    pub async fn connect_all(&self) {
        let adapters = self.adapters.read().await;
        for (key, adapter) in adapters.iter() {
            match adapter.connect(self.events_tx.clone()).await {
                Ok(()) => tracing::info!("Chat adapter connected: {}", key),
                Err(e) => {
                    tracing::error!("Chat adapter {} failed to connect: {}", key, e);
                    let _ = self
                        .events_tx
                        .send(AdapterEvent::Disconnected {
                            key: key.clone(),
                            reason: e.to_string(),
                        })
                        .await;
                }
            }
        }
    }

    /// Disconnect every registered adapter.
    pub async fn disconnect_all(&self) {
        let adapters = self.adapters.read().await;
        for (key, adapter) in adapters.iter() {
            if let Err(e) = adapter.disconnect().await {
                tracing::error!("Error disconnecting chat adapter {}: {}", key, e);
            }
        }
    }

    /// Keys of adapters whose upstream connection is currently up.
    pub async fn connected_keys(&self) -> Vec<String> {
        let adapters = self.adapters.read().await;
        let mut keys: Vec<String> = adapters
            .iter()
            .filter(|(_, a)| a.is_connected())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

/// Consume adapter events: forward messages, track reconnect state.
async fn supervise(
    adapters: Arc<RwLock<HashMap<String, Arc<dyn ChatAdapter>>>>,
    events_tx: mpsc::Sender<AdapterEvent>,
    mut events_rx: mpsc::Receiver<AdapterEvent>,
    messages_tx: mpsc::Sender<ChatMessage>,
) {
    let mut attempts: HashMap<String, u32> = HashMap::new();

    while let Some(event) = events_rx.recv().await {
        match event {
            AdapterEvent::Message(msg) => {
                if messages_tx.send(msg).await.is_err() {
                    tracing::warn!("Coordinator channel closed, stopping chat supervision");
                    break;
                }
            }
            AdapterEvent::Connected { key } => {
                tracing::info!("Chat adapter reconnected: {}", key);
                attempts.remove(&key);
            }
            AdapterEvent::Disconnected { key, reason } => {
                let attempt = attempts.entry(key.clone()).or_insert(0);
                *attempt += 1;
                if *attempt > MAX_RECONNECT_ATTEMPTS {
                    tracing::error!(
                        "Chat adapter {} gave up after {} reconnect attempts",
                        key,
                        MAX_RECONNECT_ATTEMPTS
                    );
                    continue;
                }
                let delay = reconnect_delay_ms(*attempt);
                tracing::warn!(
                    "Chat adapter {} disconnected ({}), reconnect attempt {} in {} ms",
                    key,
                    reason,
                    attempt,
                    delay
                );
                let adapter = adapters.read().await.get(&key).cloned();
                let Some(adapter) = adapter else {
                    tracing::error!("Disconnected event for unregistered adapter: {}", key);
                    continue;
                };
                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    if let Err(e) = adapter.connect(events_tx.clone()).await {
                        // Feed the failure back through the event loop so the
                        // attempt counter keeps climbing toward the cap.
                        let _ = events_tx
                            .send(AdapterEvent::Disconnected {
                                key: adapter.key().to_string(),
                                reason: e.to_string(),
                            })
                            .await;
                    }
                });
            }
            AdapterEvent::Error { key, error } => {
                tracing::warn!("Chat adapter {} error: {}", key, error);
            }
        }
    }
}

/// Backoff schedule: 5 s, 10 s, 20 s, 40 s, 60 s.
fn reconnect_delay_ms(attempt: u32) -> u64 {
    (RECONNECT_BASE_MS << (attempt.saturating_sub(1))).min(RECONNECT_MAX_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::mock::MockAdapter;

    #[test]
    fn test_reconnect_delay_schedule() {
        assert_eq!(reconnect_delay_ms(1), 5_000);
        assert_eq!(reconnect_delay_ms(2), 10_000);
        assert_eq!(reconnect_delay_ms(3), 20_000);
        assert_eq!(reconnect_delay_ms(4), 40_000);
        assert_eq!(reconnect_delay_ms(5), 60_000);
        // Capped past the doubling range.
        assert_eq!(reconnect_delay_ms(6), 60_000);
    }

    #[tokio::test]
    async fn test_messages_fan_in() {
        let (tx, mut rx) = mpsc::channel(16);
        let sources = ChatSources::new(tx);
        let adapter = Arc::new(MockAdapter::new("mock"));
        sources.register(adapter.clone()).await;
        sources.connect_all().await;

        adapter.push("alice", "first").await;
        adapter.push("bob", "second").await;

        let m1 = rx.recv().await.expect("first message");
        let m2 = rx.recv().await.expect("second message");
        assert_eq!(m1.username, "alice");
        assert_eq!(m2.username, "bob");
        assert_eq!(sources.connected_keys().await, vec!["mock".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_clears_after_connected() {
        let (tx, _rx) = mpsc::channel(16);
        let sources = ChatSources::new(tx);
        let adapter = Arc::new(MockAdapter::new("flaky"));
        sources.register(adapter.clone()).await;
        sources.connect_all().await;

        adapter.drop_connection("network reset").await;
        // First retry fires at 5 s.
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(adapter.is_connected());
    }
}
