//! Coordinator configuration.
//!
//! All tunables live in a single [`CoordinatorConfig`] value owned by the
//! coordinator task. Partial updates arrive as a [`ConfigPatch`] (the HTTP
//! config endpoint deserializes straight into one); applying a patch
//! reschedules any timers derived from the changed fields.

use serde::{Deserialize, Serialize};

use crate::coordinator::autonomy::AutonomyMode;

/// Default prompt sent on each vibe tick.
pub const DEFAULT_VIBE_PROMPT: &str = "[CRAWD:VIBE] You are on a livestream. \
Nobody is chatting right now, so do something interesting: check the market, \
riff on what you were doing, or use one of your tools. \
Respond with LIVESTREAM_REPLIED after using a tool, or NO_REPLY if there is \
truly nothing worth saying.";

/// Runtime tunables for the coordinator. All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    /// Whether autonomy (vibe/plan nudging and idle tracking) is enabled.
    pub enabled: bool,
    /// Active autonomy policy.
    pub mode: AutonomyMode,
    /// Leading-edge chat batch window.
    pub batch_window_ms: u64,
    /// Inactivity threshold before `active -> idle`.
    pub idle_after_ms: u64,
    /// Idle duration before `idle -> sleep`.
    pub sleep_after_idle_ms: u64,
    /// Interval between vibe prompts.
    pub vibe_interval_ms: u64,
    /// Delay between a plan mutation and its nudge.
    pub plan_nudge_delay_ms: u64,
    /// Prompt text for vibe ticks.
    pub vibe_prompt: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AutonomyMode::Vibe,
            batch_window_ms: 20_000,
            idle_after_ms: 180_000,
            sleep_after_idle_ms: 180_000,
            vibe_interval_ms: 30_000,
            plan_nudge_delay_ms: 100,
            vibe_prompt: DEFAULT_VIBE_PROMPT.to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Apply a partial update in place. Returns true if anything changed.
    pub fn apply(&mut self, patch: ConfigPatch) -> bool {
        let before = self.clone();
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(v) = patch.batch_window_ms {
            self.batch_window_ms = v;
        }
        if let Some(v) = patch.idle_after_ms {
            self.idle_after_ms = v;
        }
        if let Some(v) = patch.sleep_after_idle_ms {
            self.sleep_after_idle_ms = v;
        }
        if let Some(v) = patch.vibe_interval_ms {
            self.vibe_interval_ms = v;
        }
        if let Some(v) = patch.plan_nudge_delay_ms {
            self.plan_nudge_delay_ms = v;
        }
        if let Some(v) = patch.vibe_prompt {
            self.vibe_prompt = v;
        }
        *self != before
    }
}

/// Partial [`CoordinatorConfig`]; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub mode: Option<AutonomyMode>,
    pub batch_window_ms: Option<u64>,
    pub idle_after_ms: Option<u64>,
    pub sleep_after_idle_ms: Option<u64>,
    pub vibe_interval_ms: Option<u64>,
    pub plan_nudge_delay_ms: Option<u64>,
    pub vibe_prompt: Option<String>,
}
