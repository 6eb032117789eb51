//! fluux-sandbox: run external commands under a uniform, supervised contract.
//!
//! ```no_run
//! use fluux_sandbox::{ExecutionConfig, ExecutionMode, ExecutionRequest, SandboxExecutor};
//!
//! # async fn demo() -> fluux_sandbox::Result<()> {
//! let executor = SandboxExecutor::default();
//! let request = ExecutionRequest::new("cargo").args(["test", "--quiet"]);
//! let config = ExecutionConfig::new(ExecutionMode::Container).with_timeout_ms(120_000);
//!
//! let result = executor.execute(&request, &config).await?;
//! if result.timed_out {
//!     eprintln!("killed after 2 minutes");
//! } else if result.fallback {
//!     eprintln!("ran without container isolation");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod sandbox;

pub use config::Config;
pub use sandbox::{
    terminate_process_tree, ContainerConfig, ExecutionConfig, ExecutionMode, ExecutionRequest,
    ExecutionResult, Outcome, Result, SandboxError, SandboxExecutor, SENTINEL_EXIT_CODE,
};
