//! crawd: a coordinator that keeps an autonomous agent alive on a
//! livestream.
//!
//! Chat platforms feed messages in through pluggable adapters; the
//! coordinator batches them with leading-edge throttling, keeps the agent
//! occupied between bursts (periodic vibes or goal-driven plan nudges),
//! tracks an active/idle/sleep lifecycle, and gates every utterance on an
//! overlay playback ack so speech is synchronous from the agent's point
//! of view. The agent itself lives behind an RPC gateway; the overlay is
//! a WebSocket fan-out.

pub mod chat;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod overlay;
pub mod server;
pub mod tools;

pub use chat::{ChatAdapter, ChatMessage, ChatSources, Platform};
pub use config::{ConfigPatch, CoordinatorConfig};
pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorStatus};
pub use gateway::{GatewayConfig, OneShotGateway, PersistentGateway, TriggerAgent};
pub use overlay::{OverlayBus, OverlayEvent, SpeechGate};
pub use server::{ApiServer, AppState};
pub use tools::{LateBoundInvoker, ToolInvoker, ToolSurface};
