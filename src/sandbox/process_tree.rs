//! Process-tree termination.
//!
//! On Unix every supervised child is made the leader of a fresh process
//! group, so signalling the group reaches every descendant that did not
//! explicitly leave it. Other platforms only kill the direct child.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

/// Makes the spawned child the leader of its own process group.
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Terminates `child` and all of its descendants.
///
/// Sends SIGTERM to the process group, waits up to `grace` for the child to
/// exit, then sends SIGKILL to whatever is left of the group. The child is
/// always reaped before this returns.
pub async fn terminate_process_tree(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM)?;

            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                // Leader is gone, descendants may still hold the group.
                signal_group(pid, libc::SIGKILL)?;
                return status;
            }

            debug!(
                "Process group {pid} still alive after {}ms, sending SIGKILL",
                grace.as_millis()
            );
            signal_group(pid, libc::SIGKILL)?;
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    // No-op if the child already exited; otherwise kills the direct child.
    if let Err(e) = child.start_kill() {
        if e.kind() != io::ErrorKind::InvalidInput {
            debug!("start_kill failed: {e}");
        }
    }
    child.wait().await
}

/// Kills whatever is left of the process group led by `pid`.
///
/// For use once the leader has been reaped: jobs it put in the background
/// would otherwise outlive the call and keep its output pipes open.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGKILL)
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let result = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
    if result == -1 {
        let err = io::Error::last_os_error();
        // ESRCH: the whole group already exited.
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}
