//! Serialized agent-turn queue.
//!
//! Every path to the gateway funnels through this FIFO queue, so at most
//! one agent invocation is ever in flight and ordering between chat
//! flushes and autonomy nudges is deterministic. A failed turn is logged
//! and absorbed; the queue moves on.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::gateway::TriggerAgent;

const QUEUE_CAPACITY: usize = 64;

/// What produced a turn. Drives reply handling in the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Chat,
    Vibe,
    PlanNudge,
    Misalignment,
    Compact,
}

impl std::fmt::Display for TurnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnKind::Chat => f.write_str("chat"),
            TurnKind::Vibe => f.write_str("vibe"),
            TurnKind::PlanNudge => f.write_str("plan-nudge"),
            TurnKind::Misalignment => f.write_str("misalignment"),
            TurnKind::Compact => f.write_str("compact"),
        }
    }
}

/// A queued agent invocation.
#[derive(Debug)]
pub struct TurnRequest {
    pub kind: TurnKind,
    pub prompt: String,
}

/// Result of a completed turn, fed back to the coordinator.
#[derive(Debug)]
pub struct TurnOutcome {
    pub kind: TurnKind,
    pub result: Result<Vec<String>, GatewayError>,
}

/// Handle to the dispatcher task.
#[derive(Clone)]
pub struct TurnDispatcher {
    tx: mpsc::Sender<TurnRequest>,
    in_flight: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
}

impl TurnDispatcher {
    /// Spawn the consumer task. Outcomes are reported on `outcomes_tx` in
    /// completion order (which equals submission order).
    pub fn spawn(
        gateway: Arc<dyn TriggerAgent>,
        outcomes_tx: mpsc::Sender<TurnOutcome>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<TurnRequest>(QUEUE_CAPACITY);
        let in_flight = Arc::new(AtomicBool::new(false));
        let queued = Arc::new(AtomicUsize::new(0));

        let flight = Arc::clone(&in_flight);
        let depth = Arc::clone(&queued);
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                depth.fetch_sub(1, Ordering::SeqCst);
                flight.store(true, Ordering::SeqCst);
                tracing::debug!("Running {} turn ({} chars)", req.kind, req.prompt.len());
                let result = gateway.trigger(&req.prompt).await;
                flight.store(false, Ordering::SeqCst);
                if let Err(ref e) = result {
                    tracing::error!("{} turn failed: {}", req.kind, e);
                }
                if outcomes_tx
                    .send(TurnOutcome {
                        kind: req.kind,
                        result,
                    })
                    .await
                    .is_err()
                {
                    tracing::warn!("Coordinator gone, stopping turn dispatcher");
                    break;
                }
            }
        });

        Self {
            tx,
            in_flight,
            queued,
        }
    }

    /// Enqueue a turn. Never blocks; a full queue drops the intent with an
    /// error log (the next intent proceeds).
    pub fn enqueue(&self, req: TurnRequest) {
        let kind = req.kind;
        match self.tx.try_send(req) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::error!("Dropped {} turn, queue unavailable: {}", kind, e);
            }
        }
    }

    /// True while a turn is executing or waiting to execute. Autonomy
    /// reads this to skip nudges that would pile up behind a slow turn.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) || self.queued.load(Ordering::SeqCst) > 0
    }
}
