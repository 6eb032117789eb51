use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::SandboxError;

/// Which backend runs a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Direct execution, no supervision and no timeout (trusted commands only)
    None,
    /// Supervised child process in its own process group
    #[default]
    Spawn,
    /// Inside a container runtime, falling back to `Spawn` when unavailable
    Container,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Spawn => "spawn",
            Self::Container => "container",
        }
    }

    /// Whether commands run under a timeout supervisor in this mode.
    pub fn is_supervised(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "spawn" => Ok(Self::Spawn),
            "container" => Ok(Self::Container),
            other => Err(SandboxError::configuration(format!(
                "unknown execution mode '{other}' (expected none, spawn or container)"
            ))),
        }
    }
}
