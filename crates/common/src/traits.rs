//! The worker contract every specialised reasoning component implements.
//!
//! Defined in `switchboard-common` so the bus, the coordinator and the
//! agents crate can reference it without circular dependencies.

use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named request arguments. Ordered so cache fingerprints are stable.
pub type Context = BTreeMap<String, String>;

/// A component that turns a request into text.
///
/// Implementations must be safe to call repeatedly with identical inputs:
/// the orchestrator caches responses keyed on `(message, context)`.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Registration name (e.g. "search").
    fn name(&self) -> &str;

    /// Process a message and return the user-facing answer.
    async fn process(&self, message: &str, context: &Context) -> Result<String>;
}

#[async_trait]
impl<W: Worker + ?Sized> Worker for Arc<W> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process(&self, message: &str, context: &Context) -> Result<String> {
        (**self).process(message, context).await
    }
}
