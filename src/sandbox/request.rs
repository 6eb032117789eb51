//! Per-call inputs: what to run and how to run it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{Result, SandboxError};
use super::mode::ExecutionMode;

/// Default window between the graceful and the forceful termination signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// A program and its argument list. Arguments are handed to the OS as-is,
/// never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    program: String,
    args: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(SandboxError::configuration("program name is empty"));
        }
        if self.program.contains('\0') || self.args.iter().any(|a| a.contains('\0')) {
            return Err(SandboxError::configuration(
                "program name and arguments must not contain NUL bytes",
            ));
        }
        Ok(())
    }
}

/// How a command should run. Built per call; nothing here is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Deadline in milliseconds. `None` means no deadline; zero or negative
    /// values are rejected by `execute`.
    pub timeout_ms: Option<i64>,
    /// Defaults to the caller's current directory.
    pub working_directory: Option<PathBuf>,
    pub grace_period: Duration,
    /// Extra variables for the child, applied after `clear_env`.
    pub env: BTreeMap<String, String>,
    /// Start the child from an empty environment instead of inheriting ours.
    pub clear_env: bool,
    /// Per-stream capture cap in bytes. Overflow is drained and discarded,
    /// and flagged on the result.
    pub max_output_bytes: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::new(ExecutionMode::default())
    }
}

impl ExecutionConfig {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            timeout_ms: None,
            working_directory: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            env: BTreeMap::new(),
            clear_env: false,
            max_output_bytes: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_clear_env(mut self, clear_env: bool) -> Self {
        self.clear_env = clear_env;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = Some(max);
        self
    }

    /// Validates the configuration and resolves defaults.
    pub(crate) fn resolve(&self) -> Result<RunOptions> {
        let timeout = match self.timeout_ms {
            None => None,
            Some(ms) if ms <= 0 => {
                return Err(SandboxError::configuration(format!(
                    "timeout must be a positive number of milliseconds, got {ms}"
                )));
            }
            Some(ms) => Some(Duration::from_millis(ms as u64)),
        };

        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(SandboxError::configuration(format!(
                "invalid environment variable name '{key}'"
            )));
        }

        let working_directory = match &self.working_directory {
            Some(dir) => resolve_directory(dir)?,
            None => std::env::current_dir()
                .map_err(|e| SandboxError::environment("determine current directory", e))?,
        };

        Ok(RunOptions {
            timeout,
            working_directory,
            grace_period: self.grace_period,
            env: self.env.clone(),
            clear_env: self.clear_env,
            max_output_bytes: self.max_output_bytes,
        })
    }
}

fn resolve_directory(dir: &Path) -> Result<PathBuf> {
    let canonical = dir.canonicalize().map_err(|e| {
        SandboxError::configuration(format!(
            "working directory '{}' is not accessible: {e}",
            dir.display()
        ))
    })?;
    if !canonical.is_dir() {
        return Err(SandboxError::configuration(format!(
            "working directory '{}' is not a directory",
            dir.display()
        )));
    }
    Ok(canonical)
}

/// A validated [`ExecutionConfig`] as handed to a backend.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub working_directory: PathBuf,
    pub grace_period: Duration,
    pub env: BTreeMap<String, String>,
    pub clear_env: bool,
    pub max_output_bytes: Option<usize>,
}
