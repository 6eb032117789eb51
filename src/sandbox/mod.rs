//! Sandboxed command execution.
//!
//! [`SandboxExecutor`] is the single entry point. It validates the request,
//! picks a backend for the requested [`ExecutionMode`], falls back from
//! `container` to `spawn` when no container runtime answers, and normalizes
//! whatever happened into an [`ExecutionResult`].
//!
//! The isolation levels are layered:
//!
//! 1. `none`: trusted commands only, no supervision at all
//! 2. `spawn`: own process group, deadline, whole-tree termination
//! 3. `container`: `spawn` semantics around a container runtime client
//!
//! A fallback is never hidden: `backend_used` always names the backend that
//! really ran, so callers that require isolation can reject a fallback.

pub mod backend;
pub mod error;
pub mod mode;
pub mod probe;
pub mod process_tree;
pub mod request;
pub mod result;
mod supervisor;

use std::future::Future;

use tracing::{debug, info, warn};

pub use backend::{
    Backend, ContainerBackend, ContainerConfig, SpawnBackend, UnrestrictedBackend,
};
pub use error::{Result, SandboxError};
pub use mode::ExecutionMode;
pub use process_tree::terminate_process_tree;
pub use request::{ExecutionConfig, ExecutionRequest, RunOptions, DEFAULT_GRACE_PERIOD};
pub use result::{normalize, ExecutionResult, Outcome, SENTINEL_EXIT_CODE};

/// Runs commands under the requested isolation mode.
///
/// Stateless between calls apart from the container probe cache, so one
/// executor can be shared (e.g. in an `Arc`) by concurrent callers.
pub struct SandboxExecutor {
    unrestricted: UnrestrictedBackend,
    spawn: SpawnBackend,
    container: ContainerBackend,
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(ContainerConfig::default())
    }
}

impl SandboxExecutor {
    pub fn new(container: ContainerConfig) -> Self {
        Self {
            unrestricted: UnrestrictedBackend,
            spawn: SpawnBackend,
            container: ContainerBackend::new(container),
        }
    }

    /// Runs `request` to completion.
    ///
    /// A non-zero exit or a timeout is a normal `Ok` result. Errors are
    /// [`SandboxError::Configuration`] for malformed input (raised before
    /// anything is spawned) and [`SandboxError::Environment`] when the OS
    /// cannot start the process.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        config: &ExecutionConfig,
    ) -> Result<ExecutionResult> {
        self.execute_with_cancel(request, config, futures::future::pending())
            .await
    }

    /// Like [`execute`](Self::execute), but terminates the process tree as
    /// soon as `cancel` resolves (e.g. `tokio::signal::ctrl_c()`), using the
    /// same graceful-then-forceful escalation as a timeout.
    pub async fn execute_with_cancel<F>(
        &self,
        request: &ExecutionRequest,
        config: &ExecutionConfig,
        cancel: F,
    ) -> Result<ExecutionResult>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        request.validate()?;
        let options = config.resolve()?;

        let backend = self.resolve_backend(config.mode).await;
        if let Some(timeout) = options.timeout.filter(|_| !backend.mode().is_supervised()) {
            debug!(
                "Ignoring {}ms timeout: mode {} is not supervised",
                timeout.as_millis(),
                backend.mode()
            );
        }
        debug!(
            "Executing `{}` with {} args (requested: {}, backend: {}, timeout: {:?})",
            request.program(),
            request.arguments().len(),
            config.mode,
            backend.mode(),
            options.timeout
        );

        let raw = backend.run(request, &options, Box::pin(cancel)).await?;
        let result = normalize(raw, config.mode);

        info!(
            "`{}` {} in {}ms (backend: {})",
            request.program(),
            result.outcome(),
            result.duration.as_millis(),
            result.backend_used
        );
        Ok(result)
    }

    /// Probes the container runtime (cached for a few seconds).
    pub async fn is_container_runtime_available(&self) -> bool {
        self.container.is_available().await
    }

    pub fn container_config(&self) -> &ContainerConfig {
        self.container.config()
    }

    async fn resolve_backend(&self, mode: ExecutionMode) -> &dyn Backend {
        match mode {
            ExecutionMode::None => &self.unrestricted,
            ExecutionMode::Spawn => &self.spawn,
            ExecutionMode::Container => {
                if self.container.is_available().await {
                    &self.container
                } else {
                    warn!(
                        "Container runtime '{}' unavailable, falling back to spawn (no isolation)",
                        self.container.probe().runtime()
                    );
                    &self.spawn
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable_runtime() -> ContainerConfig {
        ContainerConfig {
            runtime: "fluux-sandbox-no-such-runtime".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_spawn_and_none() {
        let executor = SandboxExecutor::new(unavailable_runtime());
        assert_eq!(
            executor.resolve_backend(ExecutionMode::Spawn).await.mode(),
            ExecutionMode::Spawn
        );
        assert_eq!(
            executor.resolve_backend(ExecutionMode::None).await.mode(),
            ExecutionMode::None
        );
    }

    #[tokio::test]
    async fn test_resolve_container_falls_back_to_spawn() {
        let executor = SandboxExecutor::new(unavailable_runtime());
        assert_eq!(
            executor.resolve_backend(ExecutionMode::Container).await.mode(),
            ExecutionMode::Spawn
        );
    }

    #[tokio::test]
    async fn test_resolve_container_when_available() {
        let executor = SandboxExecutor::new(unavailable_runtime());
        executor.container.probe().record(true);
        assert_eq!(
            executor.resolve_backend(ExecutionMode::Container).await.mode(),
            ExecutionMode::Container
        );
    }

    #[tokio::test]
    async fn test_empty_program_rejected_for_every_mode() {
        let executor = SandboxExecutor::new(unavailable_runtime());
        for mode in [ExecutionMode::None, ExecutionMode::Spawn, ExecutionMode::Container] {
            let err = executor
                .execute(&ExecutionRequest::new(""), &ExecutionConfig::new(mode))
                .await
                .unwrap_err();
            assert!(err.is_configuration(), "mode {mode}: {err}");
        }
    }

    #[tokio::test]
    async fn test_non_positive_timeout_rejected_before_spawn() {
        let executor = SandboxExecutor::new(unavailable_runtime());
        // The program does not exist: a spawn attempt would be an Environment error.
        let request = ExecutionRequest::new("fluux-sandbox-no-such-program");
        let err = executor
            .execute(&request, &ExecutionConfig::default().with_timeout_ms(0))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
