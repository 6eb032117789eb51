//! Container backend: runs the command through a Docker-compatible CLI.
//!
//! The working directory is bind-mounted (`--mount type=bind`) at `workdir`
//! inside the container and the command runs there. Every run gets a unique
//! container name so an interrupted run can be removed explicitly: killing
//! the CLI client does not necessarily stop the container.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{base_command, Backend};
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::mode::ExecutionMode;
use crate::sandbox::probe::ContainerProbe;
use crate::sandbox::process_tree::isolate_process_group;
use crate::sandbox::request::{ExecutionRequest, RunOptions};
use crate::sandbox::result::{RawTermination, TerminationReason};
use crate::sandbox::supervisor::{supervise, Supervision};

/// Upper bound for the `rm -f` issued after an interrupted run.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Docker-compatible CLI ("docker", "podman", or a path)
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// Mount point of the working directory inside the container
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Passed to `run` before the image, e.g. `["--network=none"]`
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// How long a probe answer stays valid
    #[serde(default = "default_probe_ttl_secs")]
    pub probe_ttl_secs: u64,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "debian:bookworm-slim".to_string()
}

fn default_workdir() -> String {
    "/workspace".to_string()
}

fn default_probe_ttl_secs() -> u64 {
    10
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            image: default_image(),
            workdir: default_workdir(),
            extra_args: Vec::new(),
            probe_ttl_secs: default_probe_ttl_secs(),
        }
    }
}

pub struct ContainerBackend {
    config: ContainerConfig,
    probe: ContainerProbe,
}

impl ContainerBackend {
    pub fn new(config: ContainerConfig) -> Self {
        let probe = ContainerProbe::new(
            config.runtime.clone(),
            Duration::from_secs(config.probe_ttl_secs),
        );
        Self { config, probe }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn probe(&self) -> &ContainerProbe {
        &self.probe
    }

    pub async fn is_available(&self) -> bool {
        self.probe.is_available().await
    }

    /// Arguments for `<runtime>`, up to and including the user's command.
    fn run_args(
        &self,
        request: &ExecutionRequest,
        options: &RunOptions,
        name: &str,
    ) -> Result<Vec<String>> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--init".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--mount".to_string(),
            self.bind_mount(options)?,
            "--workdir".to_string(),
            self.config.workdir.clone(),
        ];

        for (key, value) in &options.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }

        args.extend(self.config.extra_args.iter().cloned());
        args.push(self.config.image.clone());
        args.push(request.program().to_string());
        args.extend(request.arguments().iter().cloned());
        Ok(args)
    }

    /// `--mount` value binding the working directory at `workdir`.
    ///
    /// Fields are comma separated, so neither path may contain a comma.
    /// Colons are fine here, unlike with `--volume`.
    fn bind_mount(&self, options: &RunOptions) -> Result<String> {
        let source = options.working_directory.to_str().ok_or_else(|| {
            SandboxError::configuration(format!(
                "working directory {} is not valid UTF-8",
                options.working_directory.display()
            ))
        })?;
        let target = &self.config.workdir;

        for path in [source, target.as_str()] {
            if path.contains(',') {
                return Err(SandboxError::configuration(format!(
                    "cannot bind-mount '{path}' into a container: path contains a comma"
                )));
            }
        }
        Ok(format!("type=bind,source={source},target={target}"))
    }

    async fn remove_container(&self, name: &str) {
        let mut cmd = Command::new(&self.config.runtime);
        cmd.args(["rm", "--force", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(REMOVE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => debug!("Removed container {name}"),
            // Already gone with --rm is the common case.
            Ok(Ok(status)) => {
                debug!("`{} rm` for {name} exited with {status}", self.config.runtime)
            }
            Ok(Err(e)) => warn!("Could not remove container {name}: {e}"),
            Err(_) => warn!("Timed out removing container {name}"),
        }
    }
}

#[async_trait]
impl Backend for ContainerBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Container
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        options: &RunOptions,
        cancel: BoxFuture<'static, ()>,
    ) -> Result<RawTermination> {
        let name = format!("fluux-sandbox-{}", uuid::Uuid::new_v4());
        let runtime = &self.config.runtime;

        // The client itself keeps our environment (DOCKER_HOST and friends);
        // the configured variables go into the container via --env.
        let client_options = RunOptions {
            env: Default::default(),
            clear_env: false,
            ..options.clone()
        };
        let mut cmd = base_command(runtime, &client_options);
        cmd.args(self.run_args(request, options, &name)?);
        isolate_process_group(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|e| SandboxError::environment(format!("spawn `{runtime}`"), e))?;
        info!(
            "Running `{}` in container {name} ({})",
            request.program(),
            self.config.image
        );

        let raw = supervise(child, self.mode(), &Supervision::from(options), cancel)
            .await
            .map_err(|e| SandboxError::environment(format!("wait for `{runtime}`"), e))?;

        if raw.reason != TerminationReason::Exited {
            self.remove_container(&name).await;
        }
        Ok(raw)
    }
}
