//! Goal-driven autonomy plans.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ToolError;

/// A single plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Completed,
    Abandoned,
}

/// An ordered goal with trackable steps. A plan is immutable once it
/// leaves `Active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub goal: String,
    pub steps: Vec<Step>,
    pub status: PlanStatus,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            steps: steps
                .into_iter()
                .map(|description| Step {
                    description,
                    done: false,
                })
                .collect(),
            status: PlanStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }

    /// Index of the first pending step.
    pub fn next_pending(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.done)
    }

    /// Mark a step done. Completes the plan when every step is done;
    /// returns true in that case.
    pub fn mark_step_done(&mut self, index: usize) -> Result<bool, ToolError> {
        if !self.is_active() {
            return Err(ToolError::PlanNotFound);
        }
        let len = self.steps.len();
        let step = self
            .steps
            .get_mut(index)
            .ok_or(ToolError::StepOutOfRange { index, len })?;
        step.done = true;
        if self.steps.iter().all(|s| s.done) {
            self.status = PlanStatus::Completed;
            return Ok(true);
        }
        Ok(false)
    }

    /// Transition to `Abandoned`. No-op unless active.
    pub fn abandon(&mut self) {
        if self.is_active() {
            self.status = PlanStatus::Abandoned;
        }
    }

    /// Render the agent-facing nudge checklist:
    ///
    /// ```text
    /// [CRAWD:PLAN]
    /// Goal: <goal>
    /// [x] 0. <done step>
    /// [-] 1. <first pending>  <-- next
    /// [ ] 2. <later pending>
    /// ```
    pub fn render_nudge(&self) -> String {
        let next = self.next_pending();
        let mut out = format!("[CRAWD:PLAN]\nGoal: {}\n", self.goal);
        for (i, step) in self.steps.iter().enumerate() {
            let line = if step.done {
                format!("[x] {}. {}", i, step.description)
            } else if next == Some(i) {
                format!("[-] {}. {}  <-- next", i, step.description)
            } else {
                format!("[ ] {}. {}", i, step.description)
            };
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str("Work the next step with your tools, call mark_step_done when it is finished, then respond with LIVESTREAM_REPLIED or NO_REPLY.");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_abc() -> Plan {
        Plan::new(
            "Check BTC",
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
        )
    }

    #[test]
    fn test_mark_steps_completes_once_all_done() {
        let mut plan = plan_abc();
        assert_eq!(plan.mark_step_done(0).unwrap(), false);
        assert_eq!(plan.mark_step_done(2).unwrap(), false);
        assert_eq!(plan.mark_step_done(1).unwrap(), true);
        assert_eq!(plan.status, PlanStatus::Completed);
    }

    #[test]
    fn test_mark_step_out_of_range() {
        let mut plan = plan_abc();
        let err = plan.mark_step_done(3).unwrap_err();
        assert!(matches!(
            err,
            ToolError::StepOutOfRange { index: 3, len: 3 }
        ));
        assert!(plan.is_active());
    }

    #[test]
    fn test_completed_plan_rejects_mutation() {
        let mut plan = Plan::new("one step", vec!["only".to_string()]);
        assert!(plan.mark_step_done(0).unwrap());
        assert!(plan.mark_step_done(0).is_err());
        // Abandon after completion is a no-op.
        plan.abandon();
        assert_eq!(plan.status, PlanStatus::Completed);
    }

    #[test]
    fn test_render_nudge_checklist() {
        let mut plan = plan_abc();
        plan.mark_step_done(0).unwrap();
        let nudge = plan.render_nudge();
        assert!(nudge.starts_with("[CRAWD:PLAN]\n"));
        assert!(nudge.contains("Goal: Check BTC"));
        assert!(nudge.contains("[x] 0. A"));
        assert!(nudge.contains("[-] 1. B  <-- next"));
        assert!(nudge.contains("[ ] 2. C"));
        // The next marker follows the step text.
        let b_pos = nudge.find("[-] 1. B").unwrap();
        let next_pos = nudge.find("<-- next").unwrap();
        assert!(next_pos > b_pos);
    }
}
