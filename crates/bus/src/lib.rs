//! Asynchronous priority message bus for Switchboard.
//!
//! The bus is a pure router: it validates, queues, delivers and records
//! envelopes. Retries and reply timeouts are applied by the caller (see the
//! coordinator's dispatcher).

pub mod bus;
pub mod types;

pub use bus::MessageBus;
pub use types::{BusConfig, BusStats, Callback, HistoryFilter, SendOutcome};
