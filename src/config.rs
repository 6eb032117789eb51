use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sandbox::{ContainerConfig, ExecutionConfig, ExecutionMode};

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub container: ContainerConfig,
}

/// Defaults for every execution, overridable per call.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Zero or negative values are rejected at execution time
    pub timeout_ms: Option<i64>,
    pub working_directory: Option<PathBuf>,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    pub max_output_bytes: Option<usize>,
    #[serde(default)]
    pub clear_env: bool,
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_grace_period_ms() -> u64 {
    250
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            timeout_ms: None,
            working_directory: None,
            grace_period_ms: default_grace_period_ms(),
            max_output_bytes: None,
            clear_env: false,
            env: BTreeMap::new(),
        }
    }
}

impl SandboxConfig {
    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            mode: self.mode,
            timeout_ms: self.timeout_ms,
            working_directory: self.working_directory.clone(),
            grace_period: Duration::from_millis(self.grace_period_ms),
            env: self.env.clone(),
            clear_env: self.clear_env,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${HOME}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
