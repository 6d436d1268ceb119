//! The coordinator: a single-writer actor owning the lifecycle state
//! machine, the chat batcher, the active plan, and every autonomy timer.
//!
//! All shared state is mutated on one task. External callers (HTTP
//! handlers, the speech gate, the tool bridge, chat sources) enqueue
//! typed [`Intent`]s; replies travel back on per-intent oneshot handles.
//! Timer deadlines are plain `Option<Instant>` fields turned into
//! `tokio::select!` arms, so rescheduling and cancellation are ordinary
//! field writes with no races.

pub mod autonomy;
pub mod batcher;
pub mod dispatcher;
pub mod plan;
pub mod reply;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::chat::message::ChatMessage;
use crate::config::{ConfigPatch, CoordinatorConfig};
use crate::error::ToolError;
use crate::gateway::TriggerAgent;
use crate::overlay::bus::{OverlayBus, OverlayEvent, PlanEventType, StatusTag};

use autonomy::{AutonomyMode, SkipReason};
use batcher::{Batch, ChatBatcher, Ingest};
use dispatcher::{TurnDispatcher, TurnKind, TurnOutcome, TurnRequest};
use plan::Plan;
use reply::{classify_all, misalignment_prompt};
use state::CoordinatorState;

/// Cadence of the idle/sleep check while awake.
const SLEEP_CHECK_PERIOD_MS: u64 = 10_000;

/// Prompt that asks the gateway to compact the agent's context.
const COMPACT_PROMPT: &str = "/compact";

/// A request into the coordinator task.
pub enum Intent {
    IngestChat(ChatMessage),
    NotifySpeech,
    Wake,
    Stop,
    SetPlan {
        goal: String,
        steps: Vec<String>,
        reply: oneshot::Sender<Result<Plan, ToolError>>,
    },
    MarkStepDone {
        index: usize,
        reply: oneshot::Sender<Result<Plan, ToolError>>,
    },
    AbandonPlan {
        reply: oneshot::Sender<Result<Plan, ToolError>>,
    },
    GetPlan {
        reply: oneshot::Sender<Option<Plan>>,
    },
    GetStatus {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    UpdateConfig {
        patch: ConfigPatch,
        reply: oneshot::Sender<CoordinatorConfig>,
    },
    LookupRecent {
        short_id: String,
        reply: oneshot::Sender<Option<ChatMessage>>,
    },
}

/// Snapshot returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub enabled: bool,
    pub state: CoordinatorState,
    /// Milliseconds since epoch of the last recorded activity.
    pub last_activity_at: i64,
    pub config: CoordinatorConfig,
}

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Intent>,
}

impl CoordinatorHandle {
    pub async fn ingest(&self, msg: ChatMessage) {
        let _ = self.tx.send(Intent::IngestChat(msg)).await;
    }

    pub async fn notify_speech(&self) {
        let _ = self.tx.send(Intent::NotifySpeech).await;
    }

    pub async fn wake(&self) {
        let _ = self.tx.send(Intent::Wake).await;
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(Intent::Stop).await;
    }

    pub async fn set_plan(
        &self,
        goal: String,
        steps: Vec<String>,
    ) -> Result<Plan, ToolError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Intent::SetPlan { goal, steps, reply })
            .await
            .map_err(|_| ToolError::Unavailable)?;
        rx.await.map_err(|_| ToolError::Unavailable)?
    }

    pub async fn mark_step_done(&self, index: usize) -> Result<Plan, ToolError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Intent::MarkStepDone { index, reply })
            .await
            .map_err(|_| ToolError::Unavailable)?;
        rx.await.map_err(|_| ToolError::Unavailable)?
    }

    pub async fn abandon_plan(&self) -> Result<Plan, ToolError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Intent::AbandonPlan { reply })
            .await
            .map_err(|_| ToolError::Unavailable)?;
        rx.await.map_err(|_| ToolError::Unavailable)?
    }

    pub async fn plan(&self) -> Option<Plan> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Intent::GetPlan { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn status(&self) -> Option<CoordinatorStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Intent::GetStatus { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn update_config(&self, patch: ConfigPatch) -> Option<CoordinatorConfig> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Intent::UpdateConfig { patch, reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn lookup_recent(&self, short_id: &str) -> Option<ChatMessage> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Intent::LookupRecent {
                short_id: short_id.to_string(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }
}

/// Spawns the coordinator task and its turn dispatcher.
pub struct Coordinator;

impl Coordinator {
    pub fn spawn(
        config: CoordinatorConfig,
        gateway: Arc<dyn TriggerAgent>,
        bus: OverlayBus,
    ) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(256);
        let (outcomes_tx, outcomes_rx) = mpsc::channel(64);
        let dispatcher = TurnDispatcher::spawn(gateway, outcomes_tx);

        let actor = Actor {
            state: CoordinatorState::Sleep,
            stopped: false,
            config,
            last_activity: Instant::now(),
            last_activity_wall_ms: chrono::Utc::now().timestamp_millis(),
            idle_since: None,
            batcher: ChatBatcher::new(chrono::Utc::now().timestamp_millis()),
            batch_deadline: None,
            vibe_deadline: None,
            nudge_deadline: None,
            plan: None,
            dispatcher,
            bus,
        };
        tokio::spawn(actor.run(rx, outcomes_rx));

        CoordinatorHandle { tx }
    }
}

struct Actor {
    state: CoordinatorState,
    stopped: bool,
    config: CoordinatorConfig,
    last_activity: Instant,
    last_activity_wall_ms: i64,
    idle_since: Option<Instant>,
    batcher: ChatBatcher,
    batch_deadline: Option<Instant>,
    vibe_deadline: Option<Instant>,
    nudge_deadline: Option<Instant>,
    plan: Option<Plan>,
    dispatcher: TurnDispatcher,
    bus: OverlayBus,
}

impl Actor {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Intent>,
        mut outcomes_rx: mpsc::Receiver<TurnOutcome>,
    ) {
        let mut sleep_check =
            tokio::time::interval(Duration::from_millis(SLEEP_CHECK_PERIOD_MS));
        sleep_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let batch_at = self.batch_deadline;
            let vibe_at = self.vibe_deadline;
            let nudge_at = self.nudge_deadline;
            let awake =
                !self.stopped && self.config.enabled && self.state != CoordinatorState::Sleep;

            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(intent) => self.handle_intent(intent),
                    None => break,
                },
                Some(outcome) = outcomes_rx.recv() => self.on_turn_finished(outcome),
                _ = tokio::time::sleep_until(batch_at.unwrap_or_else(Instant::now)),
                    if batch_at.is_some() => self.on_batch_deadline(),
                _ = tokio::time::sleep_until(vibe_at.unwrap_or_else(Instant::now)),
                    if vibe_at.is_some() => self.on_vibe_deadline(),
                _ = tokio::time::sleep_until(nudge_at.unwrap_or_else(Instant::now)),
                    if nudge_at.is_some() => self.on_nudge_deadline(),
                _ = sleep_check.tick(), if awake => self.on_sleep_check(),
            }
        }
        tracing::debug!("Coordinator task finished");
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::IngestChat(msg) => self.on_chat(msg),
            Intent::NotifySpeech => self.on_activity("speech"),
            Intent::Wake => self.on_activity("manual wake"),
            Intent::Stop => self.on_stop(),
            Intent::SetPlan { goal, steps, reply } => {
                let _ = reply.send(self.on_set_plan(goal, steps));
            }
            Intent::MarkStepDone { index, reply } => {
                let _ = reply.send(self.on_mark_step_done(index));
            }
            Intent::AbandonPlan { reply } => {
                let _ = reply.send(self.on_abandon_plan());
            }
            Intent::GetPlan { reply } => {
                let _ = reply.send(self.plan.clone());
            }
            Intent::GetStatus { reply } => {
                let _ = reply.send(CoordinatorStatus {
                    enabled: self.config.enabled && !self.stopped,
                    state: self.state,
                    last_activity_at: self.last_activity_wall_ms,
                    config: self.config.clone(),
                });
            }
            Intent::UpdateConfig { patch, reply } => {
                let _ = reply.send(self.on_update_config(patch));
            }
            Intent::LookupRecent { short_id, reply } => {
                let _ = reply.send(self.batcher.lookup_recent(&short_id));
            }
        }
    }

    // ---- chat ----

    fn on_chat(&mut self, msg: ChatMessage) {
        if self.stopped {
            return;
        }
        let outcome = self.batcher.ingest(msg.clone());
        if matches!(outcome, Ingest::DroppedStale) {
            tracing::debug!("Dropped stale chat message from {}", msg.username);
            return;
        }
        self.wake_into_active("message ingress");
        self.touch_activity();
        self.bus.publish(OverlayEvent::Chat(msg));
        match outcome {
            Ingest::Dispatch(batch) => {
                self.dispatch_batch(batch);
                self.batch_deadline =
                    Some(Instant::now() + Duration::from_millis(self.config.batch_window_ms));
            }
            Ingest::Buffered => {}
            Ingest::DroppedStale => unreachable!("stale handled above"),
        }
    }

    fn on_batch_deadline(&mut self) {
        if self.stopped {
            self.batch_deadline = None;
            return;
        }
        match self.batcher.flush() {
            Some(batch) => {
                self.dispatch_batch(batch);
                self.batch_deadline =
                    Some(Instant::now() + Duration::from_millis(self.config.batch_window_ms));
            }
            None => self.batch_deadline = None,
        }
    }

    fn dispatch_batch(&mut self, batch: Batch) {
        self.bus.publish(OverlayEvent::Status {
            status: StatusTag::Chatting,
        });
        let prompt = batch.prompt(chrono::Utc::now().timestamp_millis());
        tracing::info!("Dispatching chat batch of {}", batch.messages.len());
        self.dispatcher.enqueue(TurnRequest {
            kind: TurnKind::Chat,
            prompt,
        });
    }

    // ---- lifecycle ----

    /// Speech, chat, tool calls, and manual wake all land here: enter
    /// `Active` from wherever we are and refresh the activity clock.
    fn on_activity(&mut self, reason: &'static str) {
        if self.stopped {
            return;
        }
        self.wake_into_active(reason);
        self.touch_activity();
    }

    fn wake_into_active(&mut self, reason: &'static str) {
        if self.state != CoordinatorState::Active {
            let waking_from_sleep = self.state == CoordinatorState::Sleep;
            self.set_state(CoordinatorState::Active, reason);
            if waking_from_sleep {
                self.schedule_vibe();
            }
        }
    }

    fn touch_activity(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_wall_ms = chrono::Utc::now().timestamp_millis();
        self.idle_since = None;
    }

    fn set_state(&mut self, next: CoordinatorState, reason: &'static str) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.legal_to(next),
            "illegal state transition {} -> {} ({})",
            self.state,
            next,
            reason
        );
        if !self.state.legal_to(next) {
            tracing::error!(
                "Refusing illegal state transition {} -> {} ({})",
                self.state,
                next,
                reason
            );
            return;
        }
        tracing::info!("State {} -> {} ({})", self.state, next, reason);
        self.state = next;
        self.idle_since = if next == CoordinatorState::Idle {
            Some(Instant::now())
        } else {
            None
        };
        let status = match next {
            CoordinatorState::Sleep => StatusTag::Sleep,
            CoordinatorState::Idle => StatusTag::Idle,
            CoordinatorState::Active => StatusTag::Active,
        };
        self.bus.publish(OverlayEvent::Status { status });
    }

    fn on_sleep_check(&mut self) {
        let now = Instant::now();
        match self.state {
            CoordinatorState::Active => {
                if now.duration_since(self.last_activity).as_millis() as u64
                    >= self.config.idle_after_ms
                {
                    self.set_state(CoordinatorState::Idle, "inactivity");
                }
            }
            CoordinatorState::Idle => {
                if let Some(since) = self.idle_since {
                    if now.duration_since(since).as_millis() as u64
                        >= self.config.sleep_after_idle_ms
                    {
                        self.enter_sleep(true, "idle timeout");
                    }
                }
            }
            CoordinatorState::Sleep => {}
        }
    }

    fn enter_sleep(&mut self, compact: bool, reason: &'static str) {
        if self.state == CoordinatorState::Sleep {
            return;
        }
        if compact {
            self.dispatcher.enqueue(TurnRequest {
                kind: TurnKind::Compact,
                prompt: COMPACT_PROMPT.to_string(),
            });
        }
        self.set_state(CoordinatorState::Sleep, reason);
        self.vibe_deadline = None;
        self.nudge_deadline = None;
    }

    fn on_stop(&mut self) {
        tracing::info!("Coordinator stopping");
        self.stopped = true;
        self.set_state(CoordinatorState::Sleep, "stop");
        self.batch_deadline = None;
        self.vibe_deadline = None;
        self.nudge_deadline = None;
    }

    // ---- vibe ----

    fn schedule_vibe(&mut self) {
        if !self.stopped
            && self.config.enabled
            && self.config.mode == AutonomyMode::Vibe
            && self.state != CoordinatorState::Sleep
        {
            self.vibe_deadline =
                Some(Instant::now() + Duration::from_millis(self.config.vibe_interval_ms));
        } else {
            self.vibe_deadline = None;
        }
    }

    fn on_vibe_deadline(&mut self) {
        self.vibe_deadline = None;
        if self.stopped || !self.config.enabled || self.config.mode != AutonomyMode::Vibe {
            return;
        }
        if self.state == CoordinatorState::Sleep {
            tracing::debug!("Vibe skipped ({})", SkipReason::Sleeping);
            return;
        }
        if self.dispatcher.is_busy() {
            tracing::debug!("Vibe skipped ({})", SkipReason::Busy);
            self.schedule_vibe();
            return;
        }
        if self.state == CoordinatorState::Idle {
            self.set_state(CoordinatorState::Active, "vibe");
        }
        self.touch_activity();
        self.bus.publish(OverlayEvent::Status {
            status: StatusTag::Vibing,
        });
        self.dispatcher.enqueue(TurnRequest {
            kind: TurnKind::Vibe,
            prompt: self.config.vibe_prompt.clone(),
        });
        // Rescheduled when the turn's outcome comes back.
    }

    // ---- plan ----

    fn on_set_plan(
        &mut self,
        goal: String,
        steps: Vec<String>,
    ) -> Result<Plan, ToolError> {
        if self.stopped {
            return Err(ToolError::Unavailable);
        }
        if goal.trim().is_empty() {
            return Err(ToolError::InvalidArgs("goal must be a non-empty string".into()));
        }
        if steps.is_empty() {
            return Err(ToolError::InvalidArgs("steps must be a non-empty list".into()));
        }
        if let Some(old) = self.plan.as_mut() {
            if old.is_active() {
                old.abandon();
                self.bus.publish(OverlayEvent::Plan {
                    event_type: PlanEventType::Abandoned,
                    plan_id: old.id,
                    goal: None,
                });
            }
        }
        let plan = Plan::new(goal, steps);
        tracing::info!("Plan created: {} ({} steps)", plan.goal, plan.steps.len());
        self.bus.publish(OverlayEvent::Plan {
            event_type: PlanEventType::Created,
            plan_id: plan.id,
            goal: Some(plan.goal.clone()),
        });
        // A goal supersedes vibing; the outgoing policy's timer dies here.
        if self.config.mode != AutonomyMode::Plan {
            self.config.mode = AutonomyMode::Plan;
            self.vibe_deadline = None;
        }
        self.on_activity("plan assigned");
        self.nudge_deadline =
            Some(Instant::now() + Duration::from_millis(self.config.plan_nudge_delay_ms));
        self.plan = Some(plan.clone());
        Ok(plan)
    }

    fn on_mark_step_done(&mut self, index: usize) -> Result<Plan, ToolError> {
        if self.stopped {
            return Err(ToolError::Unavailable);
        }
        let plan = self.plan.as_mut().ok_or(ToolError::PlanNotFound)?;
        if !plan.is_active() {
            return Err(ToolError::PlanNotFound);
        }
        let completed = plan.mark_step_done(index)?;
        let snapshot = plan.clone();
        if completed {
            tracing::info!("Plan completed: {}", snapshot.goal);
            self.bus.publish(OverlayEvent::Plan {
                event_type: PlanEventType::Completed,
                plan_id: snapshot.id,
                goal: None,
            });
            self.nudge_deadline = None;
        } else {
            self.nudge_deadline =
                Some(Instant::now() + Duration::from_millis(self.config.plan_nudge_delay_ms));
        }
        self.on_activity("plan step");
        Ok(snapshot)
    }

    fn on_abandon_plan(&mut self) -> Result<Plan, ToolError> {
        let plan = self.plan.as_mut().ok_or(ToolError::PlanNotFound)?;
        if !plan.is_active() {
            return Err(ToolError::PlanNotFound);
        }
        plan.abandon();
        let snapshot = plan.clone();
        tracing::info!("Plan abandoned: {}", snapshot.goal);
        self.bus.publish(OverlayEvent::Plan {
            event_type: PlanEventType::Abandoned,
            plan_id: snapshot.id,
            goal: None,
        });
        self.nudge_deadline = None;
        Ok(snapshot)
    }

    fn on_nudge_deadline(&mut self) {
        self.nudge_deadline = None;
        if self.stopped || !self.config.enabled {
            return;
        }
        let Some(plan) = self.plan.as_ref() else {
            return;
        };
        if !plan.is_active() {
            tracing::debug!("Plan nudge skipped ({})", SkipReason::PlanInactive);
            return;
        }
        if self.state == CoordinatorState::Sleep {
            tracing::debug!("Plan nudge skipped ({})", SkipReason::Sleeping);
            return;
        }
        if self.dispatcher.is_busy() {
            // Retry once the in-flight turn drains; dropping would stall
            // the plan loop whenever mark_step_done lands mid-turn.
            tracing::debug!("Plan nudge skipped ({})", SkipReason::Busy);
            self.nudge_deadline =
                Some(Instant::now() + Duration::from_millis(self.config.plan_nudge_delay_ms));
            return;
        }
        self.bus.publish(OverlayEvent::Status {
            status: StatusTag::Planning,
        });
        self.dispatcher.enqueue(TurnRequest {
            kind: TurnKind::PlanNudge,
            prompt: plan.render_nudge(),
        });
    }

    // ---- config ----

    fn on_update_config(&mut self, patch: ConfigPatch) -> CoordinatorConfig {
        let old_mode = self.config.mode;
        let old_enabled = self.config.enabled;
        if self.config.apply(patch) {
            tracing::info!("Coordinator config updated: {:?}", self.config);
            if self.config.mode != old_mode || self.config.enabled != old_enabled {
                // Cancel the outgoing policy's timers before arming the new
                // one; both may never be scheduled at once.
                self.vibe_deadline = None;
                self.nudge_deadline = None;
                if self.config.enabled {
                    match self.config.mode {
                        AutonomyMode::Vibe => self.schedule_vibe(),
                        AutonomyMode::Plan => {
                            if self.plan.as_ref().is_some_and(|p| p.is_active()) {
                                self.nudge_deadline = Some(
                                    Instant::now()
                                        + Duration::from_millis(self.config.plan_nudge_delay_ms),
                                );
                            }
                        }
                        AutonomyMode::None => {}
                    }
                }
            } else if self.vibe_deadline.is_some() {
                // Interval changes re-arm a pending vibe from now.
                self.schedule_vibe();
            }
        }
        self.config.clone()
    }

    // ---- turn outcomes ----

    fn on_turn_finished(&mut self, outcome: TurnOutcome) {
        if self.stopped {
            return;
        }
        let replies = match outcome.result {
            Ok(replies) => replies,
            Err(_) => {
                // Already logged by the dispatcher; keep the vibe loop alive.
                if outcome.kind == TurnKind::Vibe {
                    self.schedule_vibe();
                }
                return;
            }
        };
        let classified = classify_all(&replies);
        if classified.api_errors > 0 {
            tracing::warn!(
                "{} API-error repl{} filtered from {} turn",
                classified.api_errors,
                if classified.api_errors == 1 { "y" } else { "ies" },
                outcome.kind
            );
        }
        let corrects = matches!(
            outcome.kind,
            TurnKind::Chat | TurnKind::Vibe | TurnKind::PlanNudge
        );
        if corrects && !classified.misaligned.is_empty() {
            tracing::warn!(
                "Agent misaligned on {} turn ({} repl{})",
                outcome.kind,
                classified.misaligned.len(),
                if classified.misaligned.len() == 1 { "y" } else { "ies" }
            );
            self.dispatcher.enqueue(TurnRequest {
                kind: TurnKind::Misalignment,
                prompt: misalignment_prompt(&classified.misaligned),
            });
        }
        if outcome.kind == TurnKind::Vibe {
            if classified.has_quiet_ack() {
                // The agent has nothing to say; wind down until chat wakes us.
                self.enter_sleep(true, "quiet vibe");
            } else {
                self.schedule_vibe();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    use crate::chat::message::Platform;
    use crate::error::GatewayError;

    /// Gateway stub: records every prompt, pops scripted replies, falls
    /// back to a protocol ack.
    struct ScriptedGateway {
        calls: Mutex<Vec<String>>,
        script: Mutex<VecDeque<Vec<String>>>,
    }

    impl ScriptedGateway {
        fn new(script: Vec<Vec<&str>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.into_iter().map(String::from).collect())
                        .collect(),
                ),
            })
        }

        async fn calls(&self) -> Vec<String> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl TriggerAgent for ScriptedGateway {
        async fn trigger(&self, message: &str) -> Result<Vec<String>, GatewayError> {
            self.calls.lock().await.push(message.to_string());
            let scripted = self.script.lock().await.pop_front();
            Ok(scripted.unwrap_or_else(|| vec!["LIVESTREAM_REPLIED".to_string()]))
        }
    }

    fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            mode: AutonomyMode::None,
            ..CoordinatorConfig::default()
        }
    }

    fn chat(username: &str, body: &str) -> ChatMessage {
        ChatMessage::new(Platform::Pumpfun, username, body)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_edge_batch_header_and_age() {
        let gateway = ScriptedGateway::new(vec![]);
        let handle = Coordinator::spawn(test_config(), gateway.clone(), OverlayBus::new());

        let now_ms = chrono::Utc::now().timestamp_millis();
        // m1 dispatches immediately; m2 and m3 accumulate in the window.
        handle.ingest(chat("a", "m1").with_timestamp(now_ms)).await;
        settle().await;
        // Stamp m2 15 s in the past so the flushed batch header carries
        // the age of its oldest message.
        handle
            .ingest(chat("b", "m2").with_timestamp(now_ms - 15_000))
            .await;
        handle
            .ingest(chat("c", "m3").with_timestamp(now_ms - 2_000))
            .await;
        settle().await;
        assert_eq!(gateway.calls().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(20_100)).await;
        let calls = gateway.calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("[CRAWD:CHAT - 1 message]\n"));
        assert!(calls[0].contains("a: m1"));
        assert!(calls[1].starts_with("[CRAWD:CHAT - 2 messages, 15s]\n"));
        assert!(calls[1].contains("b: m2"));
        assert!(calls[1].contains("c: m3"));
        assert!(calls[1].ends_with("[msgId] your reply)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_transitions_active_on_chat() {
        let gateway = ScriptedGateway::new(vec![]);
        let bus = OverlayBus::new();
        let mut events = bus.subscribe();
        let handle = Coordinator::spawn(test_config(), gateway.clone(), bus);

        handle.ingest(chat("a", "gm")).await;
        settle().await;
        assert_eq!(gateway.calls().await.len(), 1);

        // First observable event is the sleep -> active transition.
        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            OverlayEvent::Status {
                status: StatusTag::Active
            }
        ));
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, CoordinatorState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_then_sleep_enqueues_compact() {
        let gateway = ScriptedGateway::new(vec![]);
        let config = CoordinatorConfig {
            mode: AutonomyMode::None,
            idle_after_ms: 5_000,
            sleep_after_idle_ms: 5_000,
            ..CoordinatorConfig::default()
        };
        let handle = Coordinator::spawn(config, gateway.clone(), OverlayBus::new());

        handle.wake().await;
        settle().await;
        assert_eq!(handle.status().await.unwrap().state, CoordinatorState::Active);

        // One tick period past the idle threshold.
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(handle.status().await.unwrap().state, CoordinatorState::Idle);

        // Second hop measured from idle_since, caught by the next tick.
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(handle.status().await.unwrap().state, CoordinatorState::Sleep);
        settle().await;
        assert_eq!(gateway.calls().await, vec![COMPACT_PROMPT.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_nudge_fires_after_mark_step_done() {
        let gateway = ScriptedGateway::new(vec![]);
        let handle =
            Coordinator::spawn(CoordinatorConfig::default(), gateway.clone(), OverlayBus::new());

        let plan = handle
            .set_plan(
                "Check BTC".to_string(),
                vec!["A".to_string(), "B".to_string(), "C".to_string()],
            )
            .await
            .unwrap();
        assert!(plan.is_active());
        tokio::time::sleep(Duration::from_millis(200)).await;
        // First nudge points at step 0.
        let calls = gateway.calls().await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("[-] 0. A  <-- next"));

        let plan = handle.mark_step_done(0).await.unwrap();
        assert!(plan.steps[0].done);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let calls = gateway.calls().await;
        assert_eq!(calls.len(), 2);
        let nudge = &calls[1];
        assert!(nudge.starts_with("[CRAWD:PLAN]"));
        assert!(nudge.contains("Check BTC"));
        assert!(nudge.contains("[x] 0. A"));
        assert!(nudge.contains("[-] 1. B  <-- next"));
        assert!(nudge.contains("[ ] 2. C"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_completion_emits_single_event() {
        let gateway = ScriptedGateway::new(vec![]);
        let bus = OverlayBus::new();
        let mut events = bus.subscribe();
        let handle = Coordinator::spawn(CoordinatorConfig::default(), gateway.clone(), bus);

        handle
            .set_plan("two steps".to_string(), vec!["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        handle.mark_step_done(1).await.unwrap();
        let done = handle.mark_step_done(0).await.unwrap();
        assert_eq!(done.status, plan::PlanStatus::Completed);

        // Exactly one completed event on the bus.
        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                OverlayEvent::Plan {
                    event_type: PlanEventType::Completed,
                    ..
                }
            ) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);

        // A completed plan rejects further mutation.
        assert!(handle.mark_step_done(0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_misaligned_reply_triggers_correction() {
        let gateway = ScriptedGateway::new(vec![vec!["sure thing!"]]);
        let handle = Coordinator::spawn(test_config(), gateway.clone(), OverlayBus::new());

        handle.ingest(chat("a", "do something")).await;
        settle().await;

        let calls = gateway.calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("[CRAWD:MISALIGNED]"));
        assert!(calls[1].contains("\"sure thing!\""));
        assert_eq!(handle.status().await.unwrap().state, CoordinatorState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reply_vibe_enters_sleep() {
        let gateway = ScriptedGateway::new(vec![vec!["NO_REPLY"]]);
        let config = CoordinatorConfig {
            mode: AutonomyMode::Vibe,
            vibe_interval_ms: 1_000,
            ..CoordinatorConfig::default()
        };
        let handle = Coordinator::spawn(config, gateway.clone(), OverlayBus::new());

        handle.wake().await;
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let calls = gateway.calls().await;
        assert!(calls[0].starts_with("[CRAWD:VIBE]"));
        assert_eq!(handle.status().await.unwrap().state, CoordinatorState::Sleep);
        assert!(calls.contains(&COMPACT_PROMPT.to_string()));

        // The vibe timer is cleared: no further vibes while asleep.
        let before = gateway.calls().await.len();
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(gateway.calls().await.len(), before);

        // Chat wakes it back up.
        handle.ingest(chat("a", "wake up")).await;
        settle().await;
        assert_eq!(handle.status().await.unwrap().state, CoordinatorState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vibe_reschedules_after_protocol_ack() {
        let gateway = ScriptedGateway::new(vec![]);
        let config = CoordinatorConfig {
            mode: AutonomyMode::Vibe,
            vibe_interval_ms: 1_000,
            ..CoordinatorConfig::default()
        };
        let handle = Coordinator::spawn(config, gateway.clone(), OverlayBus::new());

        handle.wake().await;
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        // Three intervals, three vibes: the loop keeps rescheduling.
        assert_eq!(gateway.calls().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_change_cancels_vibe_timer() {
        let gateway = ScriptedGateway::new(vec![]);
        let config = CoordinatorConfig {
            mode: AutonomyMode::Vibe,
            vibe_interval_ms: 1_000,
            ..CoordinatorConfig::default()
        };
        let handle = Coordinator::spawn(config, gateway.clone(), OverlayBus::new());
        handle.wake().await;
        settle().await;

        handle
            .update_config(ConfigPatch {
                mode: Some(AutonomyMode::None),
                ..Default::default()
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert!(gateway.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timers_without_compact() {
        let gateway = ScriptedGateway::new(vec![]);
        let config = CoordinatorConfig {
            mode: AutonomyMode::Vibe,
            vibe_interval_ms: 1_000,
            ..CoordinatorConfig::default()
        };
        let handle = Coordinator::spawn(config, gateway.clone(), OverlayBus::new());
        handle.wake().await;
        settle().await;

        handle.stop().await;
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert!(gateway.calls().await.is_empty());
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, CoordinatorState::Sleep);
        assert!(!status.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_abandoned_on_replacement() {
        let gateway = ScriptedGateway::new(vec![]);
        let bus = OverlayBus::new();
        let mut events = bus.subscribe();
        let handle = Coordinator::spawn(CoordinatorConfig::default(), gateway.clone(), bus);

        let first = handle
            .set_plan("first".to_string(), vec!["a".to_string()])
            .await
            .unwrap();
        let second = handle
            .set_plan("second".to_string(), vec!["b".to_string()])
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let mut saw_abandoned = false;
        while let Ok(event) = events.try_recv() {
            if let OverlayEvent::Plan {
                event_type: PlanEventType::Abandoned,
                plan_id,
                ..
            } = event
            {
                assert_eq!(plan_id, first.id);
                saw_abandoned = true;
            }
        }
        assert!(saw_abandoned);
        assert_eq!(handle.plan().await.unwrap().id, second.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_recent_after_dispatch() {
        let gateway = ScriptedGateway::new(vec![]);
        let handle = Coordinator::spawn(test_config(), gateway.clone(), OverlayBus::new());

        let msg = chat("a", "hello");
        let short_id = msg.short_id.clone();
        handle.ingest(msg).await;
        settle().await;

        let found = handle.lookup_recent(&short_id).await.unwrap();
        assert_eq!(found.body, "hello");
        assert!(handle.lookup_recent("zzzzzz").await.is_none());
    }
}
