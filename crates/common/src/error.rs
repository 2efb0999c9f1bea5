//! Error types for Switchboard.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SwitchboardError {
    /// Malformed envelope or unknown recipient.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A worker failed while processing a delegated request.
    #[error("Delegation error ({worker}): {message}")]
    Delegation { worker: String, message: String },

    /// The completion or retrieval collaborator could not be reached.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Timeout exceeded: {0}")]
    TimeoutExceeded(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SwitchboardError {
    pub fn delegation(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delegation {
            worker: worker.into(),
            message: message.into(),
        }
    }

    /// Whether this failure means an external collaborator is down.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }
}

impl From<std::io::Error> for SwitchboardError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SwitchboardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;
