//! Overlay port: event bus out, playback acks in.

pub mod bus;
pub mod gate;

pub use bus::{OverlayBus, OverlayEvent, PlanEventType, ReplyContext, StatusTag, SubscriberFrame};
pub use gate::{SpeechGate, SpokenResult, ACK_TIMEOUT_MS};
