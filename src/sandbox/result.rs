//! Canonical execution result and the normalizer that builds it.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use serde::{Serialize, Serializer};

use super::mode::ExecutionMode;

/// Exit code reported when the process was killed instead of exiting.
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// Why the supervised wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The process exited (or was signalled) on its own.
    Exited,
    /// The deadline elapsed and the process tree was terminated.
    TimedOut,
    /// The caller cancelled and the process tree was terminated.
    Cancelled,
}

/// Bytes captured from one output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Set when the capture cap was reached and later bytes were discarded.
    pub truncated: bool,
}

/// Backend-specific termination info, before normalization.
#[derive(Debug, Clone)]
pub struct RawTermination {
    pub backend: ExecutionMode,
    pub reason: TerminationReason,
    /// Exit code if the process exited normally.
    pub code: Option<i32>,
    /// Signal number if the process was terminated by a signal.
    pub signal: Option<i32>,
    pub stdout: Captured,
    pub stderr: Captured,
    pub duration: Duration,
}

impl RawTermination {
    pub fn from_status(
        backend: ExecutionMode,
        reason: TerminationReason,
        status: ExitStatus,
        stdout: Captured,
        stderr: Captured,
        duration: Duration,
    ) -> Self {
        Self {
            backend,
            reason,
            code: status.code(),
            signal: exit_signal(&status),
            stdout,
            stderr,
            duration,
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// The uniform result of running a command, whatever backend ran it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Real exit code, or [`SENTINEL_EXIT_CODE`] if the process was killed.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// True iff the timeout supervisor terminated the process.
    pub timed_out: bool,
    /// True iff the caller's cancellation terminated the process.
    pub cancelled: bool,
    /// The backend that actually ran the command.
    pub backend_used: ExecutionMode,
    /// True when `backend_used` differs from the requested mode.
    pub fallback: bool,
    /// Terminating signal, if any (Unix only).
    pub signal: Option<i32>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Coarse classification of an [`ExecutionResult`], for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exit code 0
    Succeeded,
    /// Exited on its own with a non-zero code
    Failed(i32),
    /// Killed by the timeout supervisor
    TimedOut,
    /// Killed on caller request
    Cancelled,
    /// Terminated by a signal it did not get from us
    Killed(Option<i32>),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed(code) => write!(f, "failed with exit code {code}"),
            Self::TimedOut => write!(f, "timed out (killed)"),
            Self::Cancelled => write!(f, "cancelled (killed)"),
            Self::Killed(Some(signal)) => write!(f, "killed by signal {signal}"),
            Self::Killed(None) => write!(f, "killed"),
        }
    }
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.outcome() == Outcome::Succeeded
    }

    pub fn outcome(&self) -> Outcome {
        if self.timed_out {
            Outcome::TimedOut
        } else if self.cancelled {
            Outcome::Cancelled
        } else if self.exit_code == SENTINEL_EXIT_CODE {
            Outcome::Killed(self.signal)
        } else if self.exit_code == 0 {
            Outcome::Succeeded
        } else {
            Outcome::Failed(self.exit_code)
        }
    }
}

/// Builds the canonical result. A timeout or cancellation always maps to the
/// sentinel exit code, whatever the OS reported for the killed process.
pub fn normalize(raw: RawTermination, requested: ExecutionMode) -> ExecutionResult {
    let timed_out = raw.reason == TerminationReason::TimedOut;
    let cancelled = raw.reason == TerminationReason::Cancelled;

    let exit_code = if timed_out || cancelled {
        SENTINEL_EXIT_CODE
    } else {
        raw.code.unwrap_or(SENTINEL_EXIT_CODE)
    };

    ExecutionResult {
        exit_code,
        stdout: String::from_utf8_lossy(&raw.stdout.bytes).into_owned(),
        stderr: String::from_utf8_lossy(&raw.stderr.bytes).into_owned(),
        timed_out,
        cancelled,
        backend_used: raw.backend,
        fallback: raw.backend != requested,
        signal: raw.signal,
        stdout_truncated: raw.stdout.truncated,
        stderr_truncated: raw.stderr.truncated,
        duration: raw.duration,
    }
}
