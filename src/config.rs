//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_subcommand() -> String {
    "acp".into()
}

fn default_stop_grace_seconds() -> u64 {
    5
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

/// Agent process invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Path to the agent executable (e.g. `goose`).
    pub path: String,
    /// Fixed subcommand placing the agent into stdio protocol mode.
    #[serde(default = "default_subcommand")]
    pub subcommand: String,
    /// Environment overrides merged over the ambient environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Seconds to wait for a natural exit before force-killing on `stop()`.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
}

impl AgentConfig {
    /// Grace period granted to the agent process during `stop()`.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent process invocation settings.
    pub agent: AgentConfig,
    /// Directory holding the persisted session-mapping file.
    pub data_dir: PathBuf,
    /// Working directory handed to the agent for new and loaded sessions.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Optional system instructions applied to newly created sessions.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the persisted conversation-key → session-id mapping file.
    #[must_use]
    pub fn session_map_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    fn validate(&self) -> Result<()> {
        if self.agent.path.trim().is_empty() {
            return Err(AppError::Config("agent.path must not be empty".into()));
        }
        if self.agent.subcommand.trim().is_empty() {
            return Err(AppError::Config(
                "agent.subcommand must not be empty".into(),
            ));
        }
        Ok(())
    }
}
