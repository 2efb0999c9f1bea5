//! Retrieval layer for Switchboard.
//!
//! The search worker only depends on the [`Retriever`] contract:
//! `search(terms, filters) -> [ranked record]`. Production deployments plug
//! in their own full-text / similarity backend; this crate ships an
//! in-process [`KeywordRetriever`] over a bounded [`RecordStore`], which is
//! what tests and offline setups use.
//!
//! ```text
//!  SearchWorker ──► Retriever::search(terms, filters)
//!                        │
//!                        ▼
//!               ┌──────────────────┐
//!               │ KeywordRetriever │  term scoring + filters
//!               └────────┬─────────┘
//!                        ▼
//!               ┌──────────────────┐
//!               │   RecordStore    │  bounded, oldest evicted
//!               └──────────────────┘
//! ```

pub mod retrieval;
pub mod store;
pub mod types;

pub use retrieval::{KeywordRetriever, Retriever};
pub use store::RecordStore;
pub use types::{RankedRecord, Record, RecordKind, RetrievalConfig, SearchFilters};
