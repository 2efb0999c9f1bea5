//! Configuration for the router.
//!
//! # Security
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing API keys
//! - Warns about API keys stored in config files

use crate::classifier::ClassifierConfig;
use crate::dispatch::RetryPolicy;
use serde::{Deserialize, Serialize};
use switchboard_agents::WorkerConfig;
use switchboard_bus::BusConfig;
use switchboard_common::Conversation;
use switchboard_llm::LlmConfig;
use switchboard_optimizer::OptimizerConfig;
use tracing::warn;

/// Main router configuration. Every section is optional; the defaults run
/// fully offline with stub workers and the stub completion client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Delegate through request/response envelopes instead of calling
    /// workers directly
    #[serde(default)]
    pub deliver_via_bus: bool,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_history_capacity() -> usize {
    BusConfig::default().history_capacity
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            deliver_via_bus: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl BusSettings {
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            history_capacity: self.history_capacity,
        }
    }
}

/// One section per shipped worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default)]
    pub search: WorkerConfig,

    #[serde(default)]
    pub ideation: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Longer messages are truncated before routing
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Turns remembered between requests
    #[serde(default = "default_conversation_capacity")]
    pub conversation_capacity: usize,
}

fn default_max_input_chars() -> usize {
    1000
}

fn default_conversation_capacity() -> usize {
    Conversation::DEFAULT_CAPACITY
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            conversation_capacity: default_conversation_capacity(),
        }
    }
}

impl SwitchboardConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix systems the file must be a regular file, must not be
    /// world-writable, and must not be world-readable if it holds an API key.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let config = Self::from_file_unchecked(path)?;

        if config.llm.api_key.is_some() {
            warn!(
                "API key found in config file '{}'. For better security, \
                 use the OPENAI_API_KEY environment variable instead.",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    pub fn from_file_unchecked(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)?;
    let has_api_key = content.lines().any(|line| {
        let line = line.trim_start();
        !line.starts_with('#') && line.starts_with("api_key")
    });

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
