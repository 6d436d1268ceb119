//! Agent reply classification.
//!
//! Each string in an agent reply is classified by trimmed, case-insensitive
//! exact match against the livestream protocol acks, with an API-error
//! filter for rate-limit and HTTP-status noise so transport hiccups are
//! never mistaken for misalignment.

use std::sync::OnceLock;

use regex::Regex;

/// Protocol ack: the agent spoke (or used a tool) and confirmed it.
pub const PROTOCOL_ACK: &str = "LIVESTREAM_REPLIED";
/// Quiet ack: the agent had nothing to say.
pub const QUIET_ACK: &str = "NO_REPLY";

/// Classification of a single reply string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Transport/provider noise, e.g. "529 status code (no body)".
    ApiError,
    /// `LIVESTREAM_REPLIED`.
    ProtocolAck,
    /// `NO_REPLY`.
    QuietAck,
    /// Free-form text where a protocol ack was expected.
    Misaligned,
}

fn api_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\d{3}\s+(status code|error)|rate.?limit|too many requests|overloaded")
            .expect("api error regex is valid")
    })
}

/// Classify one reply string.
pub fn classify(reply: &str) -> ReplyKind {
    let trimmed = reply.trim();
    if trimmed.eq_ignore_ascii_case(PROTOCOL_ACK) {
        return ReplyKind::ProtocolAck;
    }
    if trimmed.eq_ignore_ascii_case(QUIET_ACK) {
        return ReplyKind::QuietAck;
    }
    if api_error_re().is_match(trimmed) {
        return ReplyKind::ApiError;
    }
    ReplyKind::Misaligned
}

/// Aggregate classification of a full reply set.
#[derive(Debug, Default)]
pub struct Classified {
    pub protocol_acks: usize,
    pub quiet_acks: usize,
    pub api_errors: usize,
    /// The offending strings, in reply order.
    pub misaligned: Vec<String>,
}

impl Classified {
    pub fn has_quiet_ack(&self) -> bool {
        self.quiet_acks > 0
    }
}

/// Classify every string in a reply.
pub fn classify_all(replies: &[String]) -> Classified {
    let mut out = Classified::default();
    for reply in replies {
        match classify(reply) {
            ReplyKind::ProtocolAck => out.protocol_acks += 1,
            ReplyKind::QuietAck => out.quiet_acks += 1,
            ReplyKind::ApiError => out.api_errors += 1,
            ReplyKind::Misaligned => out.misaligned.push(reply.trim().to_string()),
        }
    }
    out
}

/// Build the correction prompt for a set of misaligned replies, quoting at
/// most 80 characters of each.
pub fn misalignment_prompt(misaligned: &[String]) -> String {
    let mut prompt = String::from(
        "[CRAWD:MISALIGNED] Your last reply broke the livestream protocol. \
         You must never answer the coordinator with free-form text:\n",
    );
    for bad in misaligned {
        let quoted: String = bad.chars().take(80).collect();
        prompt.push_str(&format!("- \"{}\"\n", quoted));
    }
    prompt.push_str(
        "Speak to the stream with your tools instead, then respond with \
         LIVESTREAM_REPLIED, or NO_REPLY if you have nothing to say.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_acks_match_case_insensitive() {
        assert_eq!(classify("LIVESTREAM_REPLIED"), ReplyKind::ProtocolAck);
        assert_eq!(classify("  livestream_replied  "), ReplyKind::ProtocolAck);
        assert_eq!(classify("No_Reply"), ReplyKind::QuietAck);
    }

    #[test]
    fn test_api_errors_filtered() {
        assert_eq!(classify("529 status code (no body)"), ReplyKind::ApiError);
        assert_eq!(classify("500 error"), ReplyKind::ApiError);
        assert_eq!(classify("rate limit exceeded, retry later"), ReplyKind::ApiError);
        assert_eq!(classify("Too many requests"), ReplyKind::ApiError);
    }

    #[test]
    fn test_free_text_is_misaligned() {
        assert_eq!(classify("sure thing!"), ReplyKind::Misaligned);
        // A protocol ack embedded in prose is still misaligned; the match
        // is exact, not substring.
        assert_eq!(
            classify("ok! LIVESTREAM_REPLIED, done"),
            ReplyKind::Misaligned
        );
    }

    #[test]
    fn test_classify_all_aggregates() {
        let replies = vec![
            "LIVESTREAM_REPLIED".to_string(),
            "529 status code".to_string(),
            "sure thing!".to_string(),
            "NO_REPLY".to_string(),
        ];
        let c = classify_all(&replies);
        assert_eq!(c.protocol_acks, 1);
        assert_eq!(c.api_errors, 1);
        assert_eq!(c.quiet_acks, 1);
        assert_eq!(c.misaligned, vec!["sure thing!".to_string()]);
    }

    #[test]
    fn test_misalignment_prompt_quotes_and_truncates() {
        let long = "x".repeat(200);
        let prompt = misalignment_prompt(&["sure thing!".to_string(), long]);
        assert!(prompt.starts_with("[CRAWD:MISALIGNED]"));
        assert!(prompt.contains("\"sure thing!\""));
        assert!(prompt.contains(&format!("\"{}\"", "x".repeat(80))));
        assert!(!prompt.contains(&"x".repeat(81)));
    }
}
