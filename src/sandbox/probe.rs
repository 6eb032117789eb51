//! Container runtime availability probe.
//!
//! Asks the runtime CLI whether its daemon answers (`<runtime> info`). The
//! answer is cached for a short TTL: daemons get started and stopped while we
//! run, so a result is never trusted for the life of the process.

use std::process::Stdio;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use super::error::SandboxError;

/// Upper bound on a single probe. A hung daemon socket counts as unavailable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct ProbeEntry {
    available: bool,
    checked_at: Instant,
}

pub struct ContainerProbe {
    runtime: String,
    ttl: Duration,
    cached: RwLock<Option<ProbeEntry>>,
}

impl ContainerProbe {
    pub fn new(runtime: impl Into<String>, ttl: Duration) -> Self {
        Self {
            runtime: runtime.into(),
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Returns whether the runtime is usable. Never fails: any probe error
    /// means "unavailable".
    pub async fn is_available(&self) -> bool {
        if let Some(available) = self.cached() {
            return available;
        }

        let available = match self.check().await {
            Ok(()) => {
                debug!("Container runtime '{}' is available", self.runtime);
                true
            }
            Err(e) => {
                debug!("{e}");
                false
            }
        };
        self.record(available);
        available
    }

    /// Drops the cached answer so the next call probes again.
    pub fn invalidate(&self) {
        *self.cached.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn cached(&self) -> Option<bool> {
        let entry = *self.cached.read().unwrap_or_else(|p| p.into_inner());
        entry
            .filter(|entry| entry.checked_at.elapsed() < self.ttl)
            .map(|entry| entry.available)
    }

    pub(crate) fn record(&self, available: bool) {
        let entry = ProbeEntry {
            available,
            checked_at: Instant::now(),
        };
        *self.cached.write().unwrap_or_else(|p| p.into_inner()) = Some(entry);
    }

    async fn check(&self) -> Result<(), SandboxError> {
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
            Err(_) => Err(SandboxError::BackendUnavailable(format!(
                "'{} info' did not answer within {}s",
                self.runtime,
                PROBE_TIMEOUT.as_secs()
            ))),
            Ok(Err(e)) => Err(SandboxError::BackendUnavailable(format!(
                "cannot run '{}': {e}",
                self.runtime
            ))),
            Ok(Ok(output)) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(SandboxError::BackendUnavailable(format!(
                    "'{} info' failed ({}): {}",
                    self.runtime,
                    output.status,
                    stderr.trim()
                )))
            }
            Ok(Ok(_)) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_RUNTIME: &str = "fluux-sandbox-no-such-runtime";

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let probe = ContainerProbe::new(MISSING_RUNTIME, Duration::from_secs(10));
        assert!(!probe.is_available().await);
        assert_eq!(probe.cached(), Some(false));
    }

    #[tokio::test]
    async fn test_check_reports_backend_unavailable() {
        let probe = ContainerProbe::new(MISSING_RUNTIME, Duration::from_secs(10));
        let err = probe.check().await.unwrap_err();
        assert!(matches!(err, SandboxError::BackendUnavailable(_)));
        assert!(err.to_string().contains(MISSING_RUNTIME));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_runtime_is_unavailable() {
        // `false info` exits 1, like a CLI whose daemon is down.
        let probe = ContainerProbe::new("false", Duration::from_secs(10));
        assert!(!probe.is_available().await);
    }

    #[tokio::test]
    async fn test_cached_answer_is_reused() {
        let probe = ContainerProbe::new(MISSING_RUNTIME, Duration::from_secs(60));
        probe.record(true);
        // Would be false if it actually probed.
        assert!(probe.is_available().await);
    }

    #[tokio::test]
    async fn test_expired_entry_is_reprobed() {
        let probe = ContainerProbe::new(MISSING_RUNTIME, Duration::from_millis(50));
        probe.record(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.cached(), None);
        assert!(!probe.is_available().await);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let probe = ContainerProbe::new(MISSING_RUNTIME, Duration::from_secs(60));
        probe.record(true);
        probe.invalidate();
        assert_eq!(probe.cached(), None);
    }

    #[tokio::test]
    async fn test_concurrent_probes_agree() {
        let probe = ContainerProbe::new(MISSING_RUNTIME, Duration::from_secs(60));
        let answers =
            futures::future::join_all((0..8).map(|_| probe.is_available())).await;
        assert!(answers.iter().all(|available| !available));
    }
}
