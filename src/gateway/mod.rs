//! Outbound agent gateway port.
//!
//! The coordinator only ever talks to the agent through [`TriggerAgent`].
//! Two transports implement it: a persistent WebSocket connection and a
//! connection-per-call variant. Both speak the same frame protocol.

pub mod oneshot;
pub mod persistent;
pub mod protocol;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::GatewayError;

/// One agent turn: send a message, receive the reply strings.
#[async_trait]
pub trait TriggerAgent: Send + Sync {
    async fn trigger(&self, message: &str) -> Result<Vec<String>, GatewayError>;
}

/// Connection settings shared by both transports.
#[derive(Clone)]
pub struct GatewayConfig {
    /// WebSocket URL of the agent gateway.
    pub url: String,
    /// Optional bearer token for the handshake.
    pub token: Option<SecretString>,
    /// Session key stamped onto every request.
    pub session_key: String,
    /// Client id reported in the handshake.
    pub client_id: String,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            session_key: "main".to_string(),
            client_id: "crawd".to_string(),
        }
    }
}

pub use oneshot::OneShotGateway;
pub use persistent::PersistentGateway;
