//! The `none` backend: run the command as-is, for trusted input only.
//!
//! No deadline is enforced here even if one is configured, and the child
//! keeps our process group. Caller cancellation still kills the direct child.

use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use super::{base_command, Backend};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::mode::ExecutionMode;
use crate::sandbox::request::{ExecutionRequest, RunOptions};
use crate::sandbox::result::{Captured, RawTermination, TerminationReason};
use crate::sandbox::supervisor::StreamReader;

#[derive(Debug, Default)]
pub struct UnrestrictedBackend;

#[async_trait]
impl Backend for UnrestrictedBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::None
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        options: &RunOptions,
        cancel: BoxFuture<'static, ()>,
    ) -> Result<RawTermination> {
        let program = request.program();
        let environment =
            |e: std::io::Error| SandboxError::environment(format!("run `{program}`"), e);

        warn!("Running `{program}` WITHOUT sandbox or timeout (mode = none)");

        let mut cmd = base_command(program, options);
        cmd.args(request.arguments());
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::environment(format!("spawn `{program}`"), e))?;

        let cap = options.max_output_bytes;
        let stdout = child
            .stdout
            .take()
            .map(|pipe| StreamReader::spawn("stdout", pipe, cap));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| StreamReader::spawn("stderr", pipe, cap));

        let cancelled = tokio::select! {
            status = child.wait() => {
                status.map_err(environment)?;
                false
            }
            _ = cancel => true,
        };

        let (reason, status) = if cancelled {
            // Best effort: the child may have exited in the meantime.
            let _ = child.start_kill();
            (TerminationReason::Cancelled, child.wait().await.map_err(environment)?)
        } else {
            (TerminationReason::Exited, child.wait().await.map_err(environment)?)
        };

        let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));

        Ok(RawTermination::from_status(
            self.mode(),
            reason,
            status,
            stdout,
            stderr,
            started.elapsed(),
        ))
    }
}

async fn drain(reader: Option<StreamReader>) -> Captured {
    match reader {
        Some(reader) => reader.finish().await,
        None => Captured::default(),
    }
}
