//! Execution backends.
//!
//! One implementation per [`ExecutionMode`]:
//! - **none**: plain child process, no timeout, no process group
//! - **spawn**: supervised child process in its own process group
//! - **container**: supervised `<runtime> run` wrapping the command

mod container;
mod spawn;
mod unrestricted;

use std::process::Stdio;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::process::Command;

use super::error::Result;
use super::mode::ExecutionMode;
use super::request::{ExecutionRequest, RunOptions};
use super::result::RawTermination;
use super::supervisor::Supervision;

pub use container::{ContainerBackend, ContainerConfig};
pub use spawn::SpawnBackend;
pub use unrestricted::UnrestrictedBackend;

/// A strategy for running one command to completion.
///
/// Implementations report termination as a [`RawTermination`]; the executor
/// normalizes it. A command that runs and fails is `Ok`; only a failure to
/// start it is `Err`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The mode this backend implements, reported as `backend_used`.
    fn mode(&self) -> ExecutionMode;

    /// Runs `request` until it exits, hits `options.timeout` (if this backend
    /// honours timeouts) or `cancel` resolves.
    async fn run(
        &self,
        request: &ExecutionRequest,
        options: &RunOptions,
        cancel: BoxFuture<'static, ()>,
    ) -> Result<RawTermination>;
}

/// Command with captured output, closed stdin, and the configured directory
/// and environment.
fn base_command(program: &str, options: &RunOptions) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(&options.working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if options.clear_env {
        cmd.env_clear();
    }
    cmd.envs(&options.env);
    cmd
}

impl From<&RunOptions> for Supervision {
    fn from(options: &RunOptions) -> Self {
        Self {
            deadline: options.timeout,
            grace_period: options.grace_period,
            max_output_bytes: options.max_output_bytes,
        }
    }
}
