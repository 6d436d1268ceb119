//! Chat ingestion: message model, adapters, and the source multiplexer.

pub mod adapter;
pub mod message;
pub mod mock;
pub mod multiplexer;

pub use adapter::{AdapterEvent, ChatAdapter, DedupWindow};
pub use message::{ChatMessage, ChatMeta, Platform};
pub use multiplexer::ChatSources;
