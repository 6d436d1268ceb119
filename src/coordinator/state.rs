//! Coordinator lifecycle state.

use serde::{Deserialize, Serialize};

/// The coordinator's activity state.
///
/// Legal transitions:
/// - `Sleep -> Active` on wake, first message ingress, or a plan/speech
///   tool call. `Sleep -> Idle` never happens.
/// - `Active -> Idle` when the inactivity threshold elapses.
/// - `Idle -> Active` on speech, chat, or manual wake.
/// - `Idle -> Sleep` when the idle threshold elapses (context compaction
///   is enqueued on this edge).
/// - Any state `-> Sleep` on `stop()` or a quiet-ack vibe reply (no
///   compaction on stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Sleep,
    Idle,
    Active,
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Sleep => "sleep",
            CoordinatorState::Idle => "idle",
            CoordinatorState::Active => "active",
        }
    }

    /// Whether moving to `next` is a legal edge of the lifecycle table.
    ///
    /// Sleep is only ever left through `Active`; any state may drop to
    /// `Sleep` (stop, quiet vibe). Self-transitions are no-ops upstream
    /// and count as legal here.
    pub fn legal_to(&self, next: CoordinatorState) -> bool {
        use CoordinatorState::*;
        match (self, next) {
            // Waking skips idle: sleep -> idle is forbidden.
            (Sleep, Active) => true,
            (Sleep, Idle) => false,
            // Inactivity and re-activation.
            (Active, Idle) => true,
            (Idle, Active) => true,
            // Idle timeout, stop(), or a quiet vibe wind things down.
            (Idle, Sleep) | (Active, Sleep) => true,
            (a, b) => *a == b,
        }
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_tags() {
        assert_eq!(
            serde_json::to_string(&CoordinatorState::Sleep).unwrap(),
            "\"sleep\""
        );
        let s: CoordinatorState = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(s, CoordinatorState::Active);
    }

    #[test]
    fn test_legal_edges() {
        use CoordinatorState::*;
        assert!(Sleep.legal_to(Active));
        assert!(Active.legal_to(Idle));
        assert!(Idle.legal_to(Active));
        assert!(Idle.legal_to(Sleep));
        // stop() and quiet vibes drop straight to sleep.
        assert!(Active.legal_to(Sleep));
        // Sleep never passes through idle on the way up.
        assert!(!Sleep.legal_to(Idle));
    }

    #[test]
    fn test_self_transitions_are_legal() {
        use CoordinatorState::*;
        for state in [Sleep, Idle, Active] {
            assert!(state.legal_to(state));
        }
    }
}
