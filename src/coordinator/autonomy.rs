//! Autonomy policy selection.

use serde::{Deserialize, Serialize};

/// Which policy keeps the agent occupied between chat bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyMode {
    /// Periodic prompts on a fixed interval.
    Vibe,
    /// Event-driven nudges against an ordered goal.
    Plan,
    /// No autonomy; chat batching and speech gating still run.
    None,
}

impl std::fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutonomyMode::Vibe => f.write_str("vibe"),
            AutonomyMode::Plan => f.write_str("plan"),
            AutonomyMode::None => f.write_str("none"),
        }
    }
}

/// Why an autonomy firing was skipped. Logged, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Coordinator is asleep.
    Sleeping,
    /// A turn is already in flight; rescheduled.
    Busy,
    /// The plan left `Active` before its nudge fired.
    PlanInactive,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Sleeping => f.write_str("sleeping"),
            SkipReason::Busy => f.write_str("busy"),
            SkipReason::PlanInactive => f.write_str("plan inactive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serde_tags() {
        assert_eq!(serde_json::to_string(&AutonomyMode::Vibe).unwrap(), "\"vibe\"");
        let m: AutonomyMode = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(m, AutonomyMode::None);
    }
}
