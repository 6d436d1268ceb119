//! One-shot gateway transport.
//!
//! A fresh connection per agent turn: connect, handle the optional
//! `connect.challenge`, authenticate, send the request, collect the final
//! payloads, close. The whole call is bounded by a 120 s hard timeout;
//! exceeding it reports a failed turn without touching coordinator state.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::protocol::{
    AgentRequest, GatewayFrame, Hello, EVENT_CONNECT_CHALLENGE,
};
use crate::gateway::{GatewayConfig, TriggerAgent};

/// Upper bound on a one-shot turn.
pub const ONESHOT_TIMEOUT_MS: u64 = 120_000;

/// How long to wait for a pre-auth challenge before proceeding.
const CHALLENGE_WAIT_MS: u64 = 500;

/// Connection-per-call transport.
pub struct OneShotGateway {
    config: GatewayConfig,
}

impl OneShotGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    async fn run(&self, message: &str) -> Result<Vec<String>, GatewayError> {
        let (ws, _response) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| GatewayError::ConnectFailed(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // Some gateways open with a challenge before accepting auth.
        if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(
            Duration::from_millis(CHALLENGE_WAIT_MS),
            stream.next(),
        )
        .await
        {
            match GatewayFrame::parse(text.as_str()) {
                Some(GatewayFrame::Event(event)) if event.event == EVENT_CONNECT_CHALLENGE => {
                    tracing::debug!("Gateway challenge received");
                }
                _ => tracing::debug!("Ignoring pre-auth gateway frame"),
            }
        }

        let hello = Hello::new(
            self.config.client_id.clone(),
            self.config
                .token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
        );
        let json = serde_json::to_string(&hello)
            .map_err(|e| GatewayError::InvalidFrame(e.to_string()))?;
        sink.send(Message::text(json))
            .await
            .map_err(|e| GatewayError::HandshakeRejected(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let req = AgentRequest::new(id.clone(), message, self.config.session_key.as_str());
        let json = serde_json::to_string(&req)
            .map_err(|e| GatewayError::InvalidFrame(e.to_string()))?;
        sink.send(Message::text(json))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let texts = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let Some(GatewayFrame::Res(res)) = GatewayFrame::parse(text.as_str()) else {
                        continue;
                    };
                    if res.id != id {
                        continue;
                    }
                    if res.is_accepted() {
                        tracing::debug!("Agent run {} accepted, still running", id);
                        continue;
                    }
                    if let Some(error) = res.error {
                        return Err(GatewayError::Transport(error.to_string()));
                    }
                    break res.texts();
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(GatewayError::ConnectionClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(GatewayError::Transport(e.to_string())),
            }
        };

        let _ = sink.send(Message::Close(None)).await;
        Ok(texts)
    }
}

#[async_trait]
impl TriggerAgent for OneShotGateway {
    async fn trigger(&self, message: &str) -> Result<Vec<String>, GatewayError> {
        tokio::time::timeout(
            Duration::from_millis(ONESHOT_TIMEOUT_MS),
            self.run(message),
        )
        .await
        .map_err(|_| GatewayError::TurnTimeout(ONESHOT_TIMEOUT_MS))?
    }
}
