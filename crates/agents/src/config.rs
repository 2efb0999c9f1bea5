//! Worker configuration.

use serde::{Deserialize, Serialize};

/// Which implementation a worker runs.
///
/// `Live` calls the retrieval layer and the completion service; `Stub`
/// answers from canned text and needs neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    Live,
    #[default]
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub mode: WorkerMode,

    /// Records the search worker puts in front of the model
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Overrides the built-in system prompt of every worker
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_results() -> usize {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: WorkerMode::default(),
            max_results: default_max_results(),
            system_prompt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parses_lowercase() {
        let config: WorkerConfig = toml::from_str("mode = \"live\"").unwrap();
        assert_eq!(config.mode, WorkerMode::Live);
        assert_eq!(config.max_results, 5);
        assert_eq!(WorkerConfig::default().mode, WorkerMode::Stub);
    }
}
