//! Error types for sandboxed execution.
//!
//! Only malformed input and a failing spawn primitive are errors. A command
//! that exits non-zero, times out, or runs on a fallback backend is reported
//! through [`ExecutionResult`](super::ExecutionResult) instead.

use std::io;

use thiserror::Error;

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Malformed request or configuration, raised before any process starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The OS could not start the process (missing binary, permission denied, ...).
    #[error("failed to {context}: {source}")]
    Environment {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The container runtime probe failed. Consumed by the fallback path,
    /// never returned from `execute`.
    #[error("container runtime unavailable: {0}")]
    BackendUnavailable(String),
}

impl SandboxError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn environment(context: impl Into<String>, source: io::Error) -> Self {
        Self::Environment {
            context: context.into(),
            source,
        }
    }

    /// True for input errors that will fail the same way on every retry.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let err = SandboxError::configuration("program name is empty");
        assert_eq!(err.to_string(), "invalid configuration: program name is empty");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_environment_keeps_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "No such file or directory");
        let err = SandboxError::environment("spawn `frobnicate`", io_err);
        assert_eq!(
            err.to_string(),
            "failed to spawn `frobnicate`: No such file or directory"
        );
        assert!(!err.is_configuration());
        assert!(std::error::Error::source(&err).is_some());
    }
}
