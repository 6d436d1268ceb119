//! Persistent gateway transport.
//!
//! One long-lived WebSocket connection: authenticate once with the
//! protocol handshake, multiplex agent requests over it, and reconnect
//! with exponential backoff (1 s doubling to 30 s) when it drops.
//! Requests that were in flight when the connection died fail with
//! `ConnectionClosed`; the dispatcher absorbs that and moves on.
//!
//! This transport also carries the inbound-event port: `node.invoke.request`
//! events for the `talk` command are bridged to the tool surface and
//! answered with `node.invoke.result`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::protocol::{
    AgentRequest, EventFrame, GatewayFrame, Hello, InvokeRequest, InvokeResult,
    EVENT_CONNECT_CHALLENGE, EVENT_NODE_INVOKE_REQUEST,
};
use crate::gateway::{GatewayConfig, TriggerAgent};
use crate::tools::ToolInvoker;

const RECONNECT_BASE_MS: u64 = 1_000;
const RECONNECT_MAX_MS: u64 = 30_000;

enum Cmd {
    Trigger {
        message: String,
        reply: oneshot::Sender<Result<Vec<String>, GatewayError>>,
    },
}

/// Handle to the connection task.
pub struct PersistentGateway {
    cmd_tx: mpsc::Sender<Cmd>,
}

impl PersistentGateway {
    /// Spawn the connection task. `invoker` handles inbound tool
    /// invocations; pass `None` to reject them.
    pub fn spawn(config: GatewayConfig, invoker: Option<Arc<dyn ToolInvoker>>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        tokio::spawn(connection_loop(config, invoker, cmd_rx));
        Self { cmd_tx }
    }
}

#[async_trait]
impl TriggerAgent for PersistentGateway {
    async fn trigger(&self, message: &str) -> Result<Vec<String>, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Trigger {
                message: message.to_string(),
                reply,
            })
            .await
            .map_err(|_| GatewayError::ConnectionClosed)?;
        rx.await.map_err(|_| GatewayError::ConnectionClosed)?
    }
}

async fn connection_loop(
    config: GatewayConfig,
    invoker: Option<Arc<dyn ToolInvoker>>,
    mut cmd_rx: mpsc::Receiver<Cmd>,
) {
    let mut backoff = RECONNECT_BASE_MS;
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((ws, _response)) => {
                tracing::info!("Gateway connected: {}", config.url);
                backoff = RECONNECT_BASE_MS;
                match session(&config, invoker.clone(), ws, &mut cmd_rx).await {
                    Ok(()) => {
                        tracing::info!("Gateway session closed, shutting down");
                        return;
                    }
                    Err(e) => tracing::warn!("Gateway session ended: {}", e),
                }
            }
            Err(e) => tracing::warn!("Gateway connect failed: {}", e),
        }
        if cmd_rx.is_closed() {
            return;
        }
        tracing::debug!("Gateway reconnecting in {} ms", backoff);
        tokio::time::sleep(Duration::from_millis(backoff)).await;
        backoff = (backoff * 2).min(RECONNECT_MAX_MS);
    }
}

type Pending = HashMap<String, oneshot::Sender<Result<Vec<String>, GatewayError>>>;

/// Run one authenticated session until the socket drops (`Err`) or the
/// command channel closes (`Ok`).
async fn session(
    config: &GatewayConfig,
    invoker: Option<Arc<dyn ToolInvoker>>,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cmd_rx: &mut mpsc::Receiver<Cmd>,
) -> Result<(), GatewayError> {
    let (mut sink, mut stream) = ws.split();
    send_hello(&mut sink, config).await?;

    // Invoke handlers run off-task; their result frames come back here.
    let (out_tx, mut out_rx) = mpsc::channel::<serde_json::Value>(16);
    let mut pending: Pending = HashMap::new();

    let result = loop {
        tokio::select! {
            maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                Some(Cmd::Trigger { message, reply }) => {
                    let id = Uuid::new_v4().to_string();
                    let req = AgentRequest::new(id.clone(), message, config.session_key.as_str());
                    let json = match serde_json::to_string(&req) {
                        Ok(json) => json,
                        Err(e) => {
                            let _ = reply.send(Err(GatewayError::InvalidFrame(e.to_string())));
                            continue;
                        }
                    };
                    match sink.send(Message::text(json)).await {
                        Ok(()) => {
                            pending.insert(id, reply);
                        }
                        Err(e) => {
                            let _ = reply.send(Err(GatewayError::Transport(e.to_string())));
                            break Err(GatewayError::Transport("send failed".to_string()));
                        }
                    }
                }
                None => break Ok(()),
            },
            Some(frame) = out_rx.recv() => {
                if let Err(e) = sink.send(Message::text(frame.to_string())).await {
                    break Err(GatewayError::Transport(e.to_string()));
                }
            },
            maybe_msg = stream.next() => match maybe_msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(frame) = GatewayFrame::parse(text.as_str()) {
                        match frame {
                            GatewayFrame::Res(res) => handle_res(&mut pending, res),
                            GatewayFrame::Event(event) => {
                                if let Err(e) =
                                    handle_event(config, invoker.as_ref(), &out_tx, &mut sink, event)
                                        .await
                                {
                                    break Err(e);
                                }
                            }
                            GatewayFrame::Unknown => {}
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    break Err(GatewayError::ConnectionClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(GatewayError::Transport(e.to_string())),
            },
        }
    };

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(GatewayError::ConnectionClosed));
    }
    result
}

async fn send_hello<S>(sink: &mut S, config: &GatewayConfig) -> Result<(), GatewayError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let hello = Hello::new(
        config.client_id.clone(),
        config.token.as_ref().map(|t| t.expose_secret().to_string()),
    );
    let json =
        serde_json::to_string(&hello).map_err(|e| GatewayError::InvalidFrame(e.to_string()))?;
    sink.send(Message::text(json))
        .await
        .map_err(|e| GatewayError::HandshakeRejected(e.to_string()))
}

fn handle_res(pending: &mut Pending, res: crate::gateway::protocol::ResFrame) {
    if res.is_accepted() {
        tracing::debug!("Agent run {} accepted, still running", res.id);
        return;
    }
    let Some(reply) = pending.remove(&res.id) else {
        tracing::debug!("Response for unknown request id {}", res.id);
        return;
    };
    if let Some(error) = res.error {
        let _ = reply.send(Err(GatewayError::Transport(error.to_string())));
    } else {
        let _ = reply.send(Ok(res.texts()));
    }
}

async fn handle_event<S>(
    config: &GatewayConfig,
    invoker: Option<&Arc<dyn ToolInvoker>>,
    out_tx: &mpsc::Sender<serde_json::Value>,
    sink: &mut S,
    event: EventFrame,
) -> Result<(), GatewayError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match event.event.as_str() {
        EVENT_CONNECT_CHALLENGE => {
            // Re-authenticate when challenged.
            tracing::debug!("Gateway challenge received, re-sending hello");
            send_hello(sink, config).await
        }
        EVENT_NODE_INVOKE_REQUEST => {
            let req: InvokeRequest = match serde_json::from_value(event.payload) {
                Ok(req) => req,
                Err(e) => {
                    tracing::warn!("Malformed invoke request: {}", e);
                    return Ok(());
                }
            };
            match invoker {
                Some(invoker) => {
                    let invoker = Arc::clone(invoker);
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        let frame = run_invoke(invoker, req).await.into_frame();
                        let _ = out_tx.send(frame).await;
                    });
                }
                None => {
                    let frame = InvokeResult {
                        id: req.id,
                        node_id: req.node_id,
                        ok: false,
                        payload: None,
                        error: Some("no tool surface attached".to_string()),
                    }
                    .into_frame();
                    // try_send: this runs on the session task itself, which
                    // is the only drain for the channel.
                    let _ = out_tx.try_send(frame);
                }
            }
            Ok(())
        }
        other => {
            tracing::debug!("Ignoring gateway event: {}", other);
            Ok(())
        }
    }
}

async fn run_invoke(invoker: Arc<dyn ToolInvoker>, req: InvokeRequest) -> InvokeResult {
    let params = req
        .params_json
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(serde_json::Value::Null);
    match invoker.invoke(&req.command, params).await {
        Ok(payload) => InvokeResult {
            id: req.id,
            node_id: req.node_id,
            ok: true,
            payload: Some(payload),
            error: None,
        },
        Err(e) => InvokeResult {
            id: req.id,
            node_id: req.node_id,
            ok: false,
            payload: None,
            error: Some(e.to_string()),
        },
    }
}
