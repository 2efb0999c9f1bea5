//! Request routing for Switchboard.
//!
//! The orchestrator is the single entry point that:
//! 1. Answers greetings, help and malformed input without delegating
//! 2. Classifies the message into one or more intents
//! 3. Delegates each intent to its worker, directly or over the message bus
//! 4. Merges multi-intent answers and memoizes the result
//!
//! # Architecture
//!
//! ```text
//! User Message
//!      │
//!      ▼
//! ┌─────────────────┐
//! │  Orchestrator   │  ◄── special cases, classifier, optimizer
//! │  (this crate)   │
//! └────────┬────────┘
//!          │ direct call or request/response envelopes
//!    ┌─────┴──────┬────────────┐
//!    ▼            ▼            ▼
//! [Search]   [Ideation]   [Generic completion]
//!  Worker      Worker       (no worker registered)
//! ```

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod special_cases;

pub use classifier::{ClassifierConfig, IntentClassifier, KeywordClassifier};
pub use config::{BusSettings, OrchestratorSettings, SwitchboardConfig, WorkersConfig};
pub use dispatch::{BusDispatcher, RetryPolicy};
pub use orchestrator::{
    Orchestrator, OrchestratorStats, RouteState, RouterStats, APOLOGY, ORCHESTRATOR_NAME,
};
pub use special_cases::{help_text, precheck, Precheck};
