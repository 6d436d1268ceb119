//! Tool surface exposed to the agent.
//!
//! The gateway's inbound `node.invoke.request` events and the HTTP
//! conveniences both land here. `talk` resolves an optional `[shortId]`
//! prefix against the recent-message index so the agent can address a
//! specific chat message; everything else maps onto the coordinator's
//! plan operations.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::coordinator::CoordinatorHandle;
use crate::error::ToolError;
use crate::overlay::bus::ReplyContext;
use crate::overlay::gate::SpeechGate;

/// Handler for inbound tool invocations.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, command: &str, params: Value) -> Result<Value, ToolError>;
}

/// The concrete tool surface.
pub struct ToolSurface {
    gate: SpeechGate,
    coordinator: CoordinatorHandle,
}

impl ToolSurface {
    pub fn new(gate: SpeechGate, coordinator: CoordinatorHandle) -> Self {
        Self { gate, coordinator }
    }

    /// `talk` tool: speak, or reply to a chat message when the text leads
    /// with its `[shortId]` handle.
    pub async fn talk(&self, params: Value) -> Value {
        let text = params
            .get("text")
            .or_else(|| params.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return json!({ "spoken": false });
        }

        if let Some((short_id, rest)) = parse_reply_prefix(text) {
            if let Some(original) = self.coordinator.lookup_recent(short_id).await {
                let result = self
                    .gate
                    .reply(
                        rest,
                        ReplyContext {
                            username: original.username,
                            message: original.body,
                        },
                    )
                    .await;
                return json!({ "spoken": result.spoken });
            }
            // Unknown handle: speak the remainder as plain talk.
            let result = self.gate.talk(rest).await;
            return json!({ "spoken": result.spoken });
        }

        let result = self.gate.talk(text).await;
        json!({ "spoken": result.spoken })
    }

    async fn set_plan(&self, params: Value) -> Result<Value, ToolError> {
        let goal = params
            .get("goal")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("goal must be a string".into()))?;
        let steps = params
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArgs("steps must be a list of strings".into()))?
            .iter()
            .map(|s| {
                s.as_str()
                    .map(String::from)
                    .ok_or_else(|| ToolError::InvalidArgs("steps must be a list of strings".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let plan = self.coordinator.set_plan(goal.to_string(), steps).await?;
        Ok(json!({ "plan": plan }))
    }

    async fn mark_step_done(&self, params: Value) -> Result<Value, ToolError> {
        let index = params
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::InvalidArgs("index must be a non-negative integer".into()))?;
        let plan = self.coordinator.mark_step_done(index as usize).await?;
        Ok(json!({ "plan": plan }))
    }
}

#[async_trait]
impl ToolInvoker for ToolSurface {
    async fn invoke(&self, command: &str, params: Value) -> Result<Value, ToolError> {
        match command {
            "talk" => Ok(self.talk(params).await),
            "set_plan" => self.set_plan(params).await,
            "mark_step_done" => self.mark_step_done(params).await,
            "abandon_plan" => {
                let plan = self.coordinator.abandon_plan().await?;
                Ok(json!({ "plan": plan }))
            }
            "get_plan" => {
                let plan = self.coordinator.plan().await;
                Ok(json!({ "plan": plan }))
            }
            other => Err(ToolError::UnknownCommand(other.to_string())),
        }
    }
}

/// Invoker that can be attached to the gateway before the tool surface
/// exists. Invocations before binding are rejected.
#[derive(Default)]
pub struct LateBoundInvoker {
    inner: OnceLock<Arc<dyn ToolInvoker>>,
}

impl LateBoundInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, invoker: Arc<dyn ToolInvoker>) {
        if self.inner.set(invoker).is_err() {
            tracing::warn!("Tool invoker already bound");
        }
    }
}

#[async_trait]
impl ToolInvoker for LateBoundInvoker {
    async fn invoke(&self, command: &str, params: Value) -> Result<Value, ToolError> {
        match self.inner.get() {
            Some(inner) => inner.invoke(command, params).await,
            None => Err(ToolError::Unavailable),
        }
    }
}

/// Split `"[abc123] rest of the reply"` into the handle and the text.
fn parse_reply_prefix(text: &str) -> Option<(&str, &str)> {
    let trimmed = text.trim_start();
    let inner = trimmed.strip_prefix('[')?;
    let close = inner.find(']')?;
    let (candidate, rest) = inner.split_at(close);
    if candidate.len() != 6 || !candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((candidate, rest[1..].trim_start()))
}
