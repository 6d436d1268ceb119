//! Chat message record and platform tags.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source platform for a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Pumpfun,
    Youtube,
    Twitch,
    Twitter,
}

impl Platform {
    /// Uppercase tag used in agent-facing prompts. Pumpfun is the
    /// historical default and carries no tag.
    pub fn prompt_tag(&self) -> Option<&'static str> {
        match self {
            Platform::Pumpfun => None,
            Platform::Youtube => Some("YOUTUBE"),
            Platform::Twitch => Some("TWITCH"),
            Platform::Twitter => Some("TWITTER"),
        }
    }
}

/// Platform-specific metadata attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMeta {
    /// Author avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Channel moderator flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderator: Option<bool>,
    /// Channel membership flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<bool>,
    /// Super-chat amount, if the message was paid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superchat_amount: Option<String>,
    /// Super-chat highlight color.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superchat_color: Option<String>,
}

/// An immutable chat message emitted by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Globally unique identifier.
    pub id: Uuid,
    /// Six-character handle the agent uses to address this message.
    pub short_id: String,
    /// Source platform.
    pub platform: Platform,
    /// Display name of the author.
    pub username: String,
    /// Message body.
    pub body: String,
    /// Arrival time, milliseconds since epoch.
    pub timestamp_ms: i64,
    /// Platform metadata.
    #[serde(default)]
    pub meta: ChatMeta,
}

impl ChatMessage {
    /// Create a message stamped with the current wall clock.
    pub fn new(platform: Platform, username: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            short_id: short_id(),
            platform,
            username: username.into(),
            body: body.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            meta: ChatMeta::default(),
        }
    }

    /// Override the arrival timestamp.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Attach platform metadata.
    pub fn with_meta(mut self, meta: ChatMeta) -> Self {
        self.meta = meta;
        self
    }

    /// One prompt line: `[shortId] [PLATFORM] username: body`.
    pub fn prompt_line(&self) -> String {
        match self.platform.prompt_tag() {
            Some(tag) => format!("[{}] [{}] {}: {}", self.short_id, tag, self.username, self.body),
            None => format!("[{}] {}: {}", self.short_id, self.username, self.body),
        }
    }
}

/// Allocate a six-character alphanumeric short id.
pub fn short_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_shape() {
        for _ in 0..32 {
            let id = short_id();
            assert_eq!(id.len(), 6);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_prompt_line_omits_pumpfun_tag() {
        let mut msg = ChatMessage::new(Platform::Pumpfun, "alice", "gm");
        msg.short_id = "abc123".to_string();
        assert_eq!(msg.prompt_line(), "[abc123] alice: gm");
    }

    #[test]
    fn test_prompt_line_tags_other_platforms() {
        let mut msg = ChatMessage::new(Platform::Youtube, "bob", "hello there");
        msg.short_id = "xyz789".to_string();
        assert_eq!(msg.prompt_line(), "[xyz789] [YOUTUBE] bob: hello there");
    }

    #[test]
    fn test_platform_serde_tags() {
        assert_eq!(serde_json::to_string(&Platform::Pumpfun).unwrap(), "\"pumpfun\"");
        let p: Platform = serde_json::from_str("\"twitch\"").unwrap();
        assert_eq!(p, Platform::Twitch);
    }
}
