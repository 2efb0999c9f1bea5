//! Common types and traits shared across Switchboard crates.
//!
//! This crate provides the foundational abstractions the router, the bus,
//! the optimizer and the workers use to talk to each other.

pub mod conversation;
pub mod envelope;
pub mod error;
pub mod intent;
pub mod text;
pub mod traits;

pub use conversation::{render_history, Conversation, ConversationTurn, TurnRole, HISTORY_KEY};
pub use envelope::{Envelope, EnvelopeStatus, MessageType, Priority};
pub use error::{Result, SwitchboardError};
pub use intent::{IntentCategory, IntentResult};
pub use traits::{Context, Worker};

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
