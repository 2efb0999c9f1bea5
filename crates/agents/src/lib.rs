//! Specialised workers behind the Switchboard orchestrator.
//!
//! - **Search Worker**: looks up stored records through a [`Retriever`]
//!   and has the completion service answer from them
//! - **Ideation Worker**: brainstorming and suggestions
//!
//! Each worker runs in one of two explicitly configured modes:
//! [`WorkerMode::Live`] talks to the retrieval layer and the completion
//! service, [`WorkerMode::Stub`] answers from canned text so the router
//! stays usable offline.
//!
//! ```text
//!              ┌──────────────┐
//!              │ Orchestrator │
//!              └──────┬───────┘
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//!  ┌─────────────┐         ┌─────────────┐
//!  │   Search    │         │  Ideation   │
//!  │   Worker    │         │   Worker    │
//!  └──┬───────┬──┘         └──────┬──────┘
//!     │       │                   │
//!     ▼       ▼                   ▼
//! Retriever  LlmClient ◄──────────┘
//! ```
//!
//! [`Retriever`]: switchboard_memory::Retriever

pub mod config;
pub mod ideation;
pub mod search;

pub use config::{WorkerConfig, WorkerMode};
pub use ideation::IdeationWorker;
pub use search::SearchWorker;
