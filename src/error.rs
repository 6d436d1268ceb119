//! Error types shared across the coordinator.

use thiserror::Error;

/// Errors raised by chat adapters and the source multiplexer.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("adapter {key} failed to connect: {reason}")]
    ConnectFailed { key: String, reason: String },

    #[error("adapter {key} disconnected: {reason}")]
    Disconnected { key: String, reason: String },

    #[error("adapter {key} is not registered")]
    UnknownAdapter { key: String },

    #[error("adapter {key} gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { key: String, attempts: u32 },
}

/// Errors raised by the agent gateway transports.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway connection failed: {0}")]
    ConnectFailed(String),

    #[error("gateway handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway returned a malformed frame: {0}")]
    InvalidFrame(String),

    #[error("agent turn timed out after {0} ms")]
    TurnTimeout(u64),

    #[error("gateway connection closed mid-turn")]
    ConnectionClosed,
}

/// Errors returned to the agent from the tool surface.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing or invalid parameter: {0}")]
    InvalidArgs(String),

    #[error("no active plan")]
    PlanNotFound,

    #[error("step index {index} out of range (plan has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error("unknown tool command: {0}")]
    UnknownCommand(String),

    #[error("coordinator unavailable")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::ReconnectExhausted {
            key: "youtube".to_string(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "adapter youtube gave up after 5 reconnect attempts"
        );

        let err = ToolError::StepOutOfRange { index: 4, len: 3 };
        assert!(err.to_string().contains("index 4"));
    }
}
