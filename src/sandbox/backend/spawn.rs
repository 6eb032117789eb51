use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use super::{base_command, Backend};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::mode::ExecutionMode;
use crate::sandbox::process_tree::isolate_process_group;
use crate::sandbox::request::{ExecutionRequest, RunOptions};
use crate::sandbox::result::RawTermination;
use crate::sandbox::supervisor::{supervise, Supervision};

/// Direct child process under timeout supervision. Always available.
#[derive(Debug, Default)]
pub struct SpawnBackend;

#[async_trait]
impl Backend for SpawnBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Spawn
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        options: &RunOptions,
        cancel: BoxFuture<'static, ()>,
    ) -> Result<RawTermination> {
        let program = request.program();
        let mut cmd = base_command(program, options);
        cmd.args(request.arguments());
        isolate_process_group(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|e| SandboxError::environment(format!("spawn `{program}`"), e))?;
        debug!("Spawned `{program}` (pid {:?})", child.id());

        supervise(child, self.mode(), &Supervision::from(options), cancel)
            .await
            .map_err(|e| SandboxError::environment(format!("wait for `{program}`"), e))
    }
}
