//! Unified HTTP server: coordinator endpoints, mock fixtures, and the
//! overlay WebSocket. One listener hosts everything; handlers only hold
//! cloneable handles, all real work happens in the coordinator task.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chat::message::{ChatMessage, Platform};
use crate::chat::multiplexer::ChatSources;
use crate::config::ConfigPatch;
use crate::coordinator::CoordinatorHandle;
use crate::overlay::bus::{OverlayBus, OverlayEvent, ReplyContext, SubscriberFrame};
use crate::overlay::gate::SpeechGate;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub gate: SpeechGate,
    pub bus: OverlayBus,
    pub sources: Arc<ChatSources>,
}

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/crawd/talk", post(talk_handler))
        .route("/chat/status", get(chat_status_handler))
        .route("/coordinator/status", get(coordinator_status_handler))
        .route("/coordinator/config", post(coordinator_config_handler))
        .route("/plan", get(plan_handler))
        .route("/mock/chat", post(mock_chat_handler))
        .route("/mock/turn", post(mock_turn_handler))
        .route("/overlay", get(overlay_ws_handler))
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
}

fn required_str<'a>(body: &'a Value, field: &str) -> Result<&'a str, (StatusCode, Json<Value>)> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| bad_request(format!("{} must be a non-empty string", field)))
}

async fn talk_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let message = required_str(&body, "message")?;
    let result = state.gate.talk(message).await;
    Ok(Json(json!({ "ok": result.spoken })))
}

async fn chat_status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "connected": state.sources.connected_keys().await }))
}

async fn coordinator_status_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.coordinator.status().await {
        Some(status) => Ok(Json(serde_json::to_value(status).unwrap_or_default())),
        None => Err(bad_request("coordinator unavailable")),
    }
}

async fn coordinator_config_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let patch: ConfigPatch =
        serde_json::from_value(body).map_err(|e| bad_request(e.to_string()))?;
    match state.coordinator.update_config(patch).await {
        Some(config) => Ok(Json(json!({ "ok": true, "config": config }))),
        None => Err(bad_request("coordinator unavailable")),
    }
}

async fn plan_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "plan": state.coordinator.plan().await }))
}

async fn mock_chat_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let username = required_str(&body, "username")?;
    let message = required_str(&body, "message")?;
    state
        .coordinator
        .ingest(ChatMessage::new(Platform::Pumpfun, username, message))
        .await;
    Ok(Json(json!({ "ok": true })))
}

async fn mock_turn_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let username = required_str(&body, "username")?;
    let message = required_str(&body, "message")?;
    let response = required_str(&body, "response")?;
    state.bus.publish(OverlayEvent::ReplyTurn {
        id: Uuid::new_v4(),
        chat: ReplyContext {
            username: username.to_string(),
            message: message.to_string(),
        },
        bot_message: response.to_string(),
    });
    Ok(Json(json!({ "ok": true })))
}

async fn overlay_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_overlay_socket(socket, state))
}

/// Forward bus events to the subscriber; route its frames (acks, mock
/// chat) back into the gate and coordinator.
async fn handle_overlay_socket(socket: WebSocket, state: AppState) {
    tracing::info!("Overlay subscriber connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.bus.subscribe();

    let inbound_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<SubscriberFrame>(text.as_str()) {
                        Ok(SubscriberFrame::TalkDone { id }) => {
                            if !inbound_state.gate.ack(id).await {
                                tracing::debug!("Ack for unknown utterance {}", id);
                            }
                        }
                        Ok(SubscriberFrame::MockChat { username, message }) => {
                            inbound_state
                                .coordinator
                                .ingest(ChatMessage::new(Platform::Pumpfun, username, message))
                                .await;
                        }
                        Err(e) => {
                            tracing::debug!("Ignoring overlay frame: {}", e);
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Overlay receive error: {}", e);
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            result = events.recv() => match result {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("Failed to serialize overlay event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Overlay subscriber lagged, {} events dropped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut recv_task => break,
        }
    }

    tracing::info!("Overlay subscriber disconnected");
}

/// The unified server: bind once, serve every route, shut down
/// gracefully on signal.
pub struct ApiServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind the listener and spawn the server task.
    pub async fn start(&mut self, state: AppState) -> std::io::Result<SocketAddr> {
        let app = router(state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("API server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("API server shutting down");
                })
                .await
            {
                tracing::error!("API server error: {}", e);
            }
        });
        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::CoordinatorConfig;
    use crate::coordinator::autonomy::AutonomyMode;
    use crate::coordinator::Coordinator;
    use crate::error::GatewayError;
    use crate::gateway::TriggerAgent;

    struct NullGateway;

    #[async_trait]
    impl TriggerAgent for NullGateway {
        async fn trigger(&self, _message: &str) -> Result<Vec<String>, GatewayError> {
            Ok(vec!["LIVESTREAM_REPLIED".to_string()])
        }
    }

    fn app_state() -> AppState {
        let bus = OverlayBus::new();
        let (chat_tx, _chat_rx) = tokio::sync::mpsc::channel(16);
        let config = CoordinatorConfig {
            mode: AutonomyMode::None,
            ..CoordinatorConfig::default()
        };
        let coordinator = Coordinator::spawn(config, Arc::new(NullGateway), bus.clone());
        let gate = SpeechGate::new(bus.clone(), coordinator.clone());
        AppState {
            coordinator,
            gate,
            bus,
            sources: Arc::new(ChatSources::new(chat_tx)),
        }
    }

    #[tokio::test]
    async fn test_mock_turn_publishes_reply_turn() {
        let state = app_state();
        let mut events = state.bus.subscribe();

        let result = mock_turn_handler(
            State(state),
            Json(json!({
                "username": "alice",
                "message": "gm",
                "response": "gm alice"
            })),
        )
        .await
        .unwrap();
        assert_eq!(result.0, json!({ "ok": true }));

        match events.recv().await.unwrap() {
            OverlayEvent::ReplyTurn {
                chat, bot_message, ..
            } => {
                assert_eq!(chat.username, "alice");
                assert_eq!(bot_message, "gm alice");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_turn_validates_fields() {
        let state = app_state();
        let err = mock_turn_handler(State(state), Json(json!({ "username": "a" })))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1 .0["error"].as_str().unwrap().contains("message"));
    }

    #[tokio::test]
    async fn test_config_endpoint_patches_and_echoes() {
        let state = app_state();
        let result = coordinator_config_handler(
            State(state.clone()),
            Json(json!({ "batch_window_ms": 5000 })),
        )
        .await
        .unwrap();
        assert_eq!(result.0["ok"], true);
        assert_eq!(result.0["config"]["batch_window_ms"], 5000);

        // Unknown fields are rejected, not silently dropped.
        let err = coordinator_config_handler(
            State(state),
            Json(json!({ "batchWindow": 5000 })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_endpoint_shape() {
        let state = app_state();
        let result = coordinator_status_handler(State(state)).await.unwrap();
        assert_eq!(result.0["state"], "sleep");
        assert_eq!(result.0["enabled"], true);
        assert!(result.0["lastActivityAt"].as_i64().is_some());
        assert!(result.0["config"]["batch_window_ms"].as_u64().is_some());
    }
}
