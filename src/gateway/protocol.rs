//! Gateway wire protocol.
//!
//! Frames are JSON text messages. Outbound: a `hello` handshake carrying
//! the supported protocol-version range, then `req` frames per agent turn.
//! Inbound: `res` frames (intermediate frames carry
//! `payload.status = "accepted"`, the final frame carries
//! `result.payloads`), and `event` frames (`connect.challenge`,
//! `node.invoke.request`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION_MIN: u32 = 3;
pub const PROTOCOL_VERSION_MAX: u32 = 3;

/// Status value of an intermediate `res` frame.
pub const STATUS_ACCEPTED: &str = "accepted";

pub const EVENT_CONNECT_CHALLENGE: &str = "connect.challenge";
pub const EVENT_NODE_INVOKE_REQUEST: &str = "node.invoke.request";
pub const EVENT_NODE_INVOKE_RESULT: &str = "node.invoke.result";

/// Connection handshake.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub min_protocol_version: u32,
    pub max_protocol_version: u32,
    pub client: ClientInfo,
    pub commands: Vec<String>,
    pub auth: AuthInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: &'static str,
    pub mode: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Hello {
    pub fn new(client_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            frame_type: "hello",
            min_protocol_version: PROTOCOL_VERSION_MIN,
            max_protocol_version: PROTOCOL_VERSION_MAX,
            client: ClientInfo {
                id: client_id.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                platform: "node",
                mode: "backend",
            },
            commands: vec!["talk".to_string()],
            auth: AuthInfo { token },
        }
    }
}

/// One agent-turn request.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub id: String,
    pub method: &'static str,
    pub params: AgentParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentParams {
    pub message: String,
    pub idempotency_key: String,
    pub session_key: String,
}

impl AgentRequest {
    pub fn new(id: impl Into<String>, message: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            frame_type: "req",
            id: id.into(),
            method: "agent",
            params: AgentParams {
                message: message.into(),
                idempotency_key: uuid::Uuid::new_v4().to_string(),
                session_key: session_key.into(),
            },
        }
    }
}

/// Any inbound frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayFrame {
    Res(ResFrame),
    Event(EventFrame),
    #[serde(other)]
    Unknown,
}

impl GatewayFrame {
    pub fn parse(text: &str) -> Option<GatewayFrame> {
        match serde_json::from_str(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!("Ignoring unparseable gateway frame: {}", e);
                None
            }
        }
    }
}

/// Response frame for a `req`.
#[derive(Debug, Deserialize)]
pub struct ResFrame {
    pub id: String,
    #[serde(default)]
    pub payload: Option<ResPayload>,
    #[serde(default)]
    pub result: Option<ResResult>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ResPayload {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResResult {
    #[serde(default)]
    pub payloads: Vec<TextPayload>,
}

#[derive(Debug, Deserialize)]
pub struct TextPayload {
    #[serde(default)]
    pub text: Option<String>,
}

impl ResFrame {
    /// True for intermediate "still running" frames.
    pub fn is_accepted(&self) -> bool {
        self.result.is_none()
            && self.error.is_none()
            && self
                .payload
                .as_ref()
                .and_then(|p| p.status.as_deref())
                .is_some_and(|s| s == STATUS_ACCEPTED)
    }

    /// Reply strings of a final frame.
    pub fn texts(&self) -> Vec<String> {
        self.result
            .as_ref()
            .map(|r| r.payloads.iter().filter_map(|p| p.text.clone()).collect())
            .unwrap_or_default()
    }
}

/// Server-initiated event frame.
#[derive(Debug, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Inbound tool invocation dispatched by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub id: String,
    pub node_id: String,
    pub command: String,
    #[serde(default, rename = "paramsJSON")]
    pub params_json: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Reply to an [`InvokeRequest`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub id: String,
    pub node_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvokeResult {
    /// Frame the result as an outbound event message.
    pub fn into_frame(self) -> Value {
        serde_json::json!({
            "type": "event",
            "event": EVENT_NODE_INVOKE_RESULT,
            "payload": self,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_wire_shape() {
        let hello = Hello::new("crawd", Some("secret".to_string()));
        let json = serde_json::to_value(&hello).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["minProtocolVersion"], 3);
        assert_eq!(json["maxProtocolVersion"], 3);
        assert_eq!(json["client"]["platform"], "node");
        assert_eq!(json["client"]["mode"], "backend");
        assert_eq!(json["commands"][0], "talk");
        assert_eq!(json["auth"]["token"], "secret");

        let anon = Hello::new("crawd", None);
        let json = serde_json::to_value(&anon).unwrap();
        assert!(json["auth"].get("token").is_none());
    }

    #[test]
    fn test_request_wire_shape() {
        let req = AgentRequest::new("r1", "hello", "main");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "req");
        assert_eq!(json["method"], "agent");
        assert_eq!(json["params"]["message"], "hello");
        assert_eq!(json["params"]["sessionKey"], "main");
        assert!(json["params"]["idempotencyKey"].as_str().is_some());
    }

    #[test]
    fn test_accepted_frame_is_not_final() {
        let frame = GatewayFrame::parse(
            r#"{"type":"res","id":"r1","payload":{"status":"accepted"}}"#,
        )
        .unwrap();
        match frame {
            GatewayFrame::Res(res) => {
                assert!(res.is_accepted());
                assert!(res.texts().is_empty());
            }
            _ => panic!("expected res frame"),
        }
    }

    #[test]
    fn test_final_frame_texts() {
        let frame = GatewayFrame::parse(
            r#"{"type":"res","id":"r1","result":{"payloads":[{"text":"LIVESTREAM_REPLIED"},{"text":"NO_REPLY"}]}}"#,
        )
        .unwrap();
        match frame {
            GatewayFrame::Res(res) => {
                assert!(!res.is_accepted());
                assert_eq!(
                    res.texts(),
                    vec!["LIVESTREAM_REPLIED".to_string(), "NO_REPLY".to_string()]
                );
            }
            _ => panic!("expected res frame"),
        }
    }

    #[test]
    fn test_invoke_roundtrip() {
        let frame = GatewayFrame::parse(
            r#"{"type":"event","event":"node.invoke.request","payload":{"id":"i1","nodeId":"n1","command":"talk","paramsJSON":"{\"text\":\"hi\"}","timeoutMs":30000}}"#,
        )
        .unwrap();
        let GatewayFrame::Event(event) = frame else {
            panic!("expected event frame");
        };
        assert_eq!(event.event, EVENT_NODE_INVOKE_REQUEST);
        let req: InvokeRequest = serde_json::from_value(event.payload).unwrap();
        assert_eq!(req.command, "talk");
        assert_eq!(req.node_id, "n1");

        let result = InvokeResult {
            id: req.id,
            node_id: req.node_id,
            ok: true,
            payload: Some(serde_json::json!({"spoken": true})),
            error: None,
        }
        .into_frame();
        assert_eq!(result["event"], "node.invoke.result");
        assert_eq!(result["payload"]["ok"], true);
        assert_eq!(result["payload"]["nodeId"], "n1");
    }

    #[test]
    fn test_unknown_frames_tolerated() {
        assert!(matches!(
            GatewayFrame::parse(r#"{"type":"tick","seq":1}"#),
            Some(GatewayFrame::Unknown)
        ));
        assert!(GatewayFrame::parse("not json").is_none());
    }
}
