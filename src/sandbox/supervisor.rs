//! Timeout supervision for a running child.
//!
//! The child's stdout and stderr are drained on their own tasks for the whole
//! lifetime of the process, so neither pipe can fill up and stall it. The
//! wait races a deadline timer and the caller's cancellation future; whichever
//! loses is dropped without side effects.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::mode::ExecutionMode;
use super::process_tree::{kill_process_group, terminate_process_tree};
use super::result::{Captured, RawTermination, TerminationReason};

/// How long to wait for the stream readers once the process is gone.
/// Descendants that escaped the process group can keep a pipe open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_SIZE: usize = 8192;

/// Limits applied while a child runs.
#[derive(Debug, Clone)]
pub(crate) struct Supervision {
    pub deadline: Option<Duration>,
    pub grace_period: Duration,
    pub max_output_bytes: Option<usize>,
}

/// Waits for `child` under `supervision`, terminating its process tree on
/// deadline or cancellation, and returns once both streams are collected.
///
/// The child must have been spawned with piped stdout and stderr, as the
/// leader of its own process group: whatever is left of that group after the
/// child exits is killed.
pub(crate) async fn supervise(
    mut child: Child,
    backend: ExecutionMode,
    supervision: &Supervision,
    cancel: BoxFuture<'static, ()>,
) -> io::Result<RawTermination> {
    let started = Instant::now();
    let leader = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout pipe was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr pipe was not captured"))?;

    let stdout_reader = StreamReader::spawn("stdout", stdout, supervision.max_output_bytes);
    let stderr_reader = StreamReader::spawn("stderr", stderr, supervision.max_output_bytes);

    let deadline = supervision.deadline;
    let expired = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => futures::future::pending::<()>().await,
        }
    };

    let reason = tokio::select! {
        status = child.wait() => {
            status?;
            TerminationReason::Exited
        }
        _ = expired => TerminationReason::TimedOut,
        _ = cancel => TerminationReason::Cancelled,
    };

    let status = match reason {
        TerminationReason::Exited => {
            let status = child.wait().await?;
            if let Some(pid) = leader {
                if let Err(e) = kill_process_group(pid) {
                    warn!("Could not kill leftover processes of group {pid}: {e}");
                }
            }
            status
        }
        TerminationReason::TimedOut | TerminationReason::Cancelled => {
            let cause = match reason {
                TerminationReason::TimedOut => "deadline reached",
                _ => "cancelled",
            };
            warn!(
                "Terminating process tree ({cause}) after {}ms",
                started.elapsed().as_millis()
            );
            terminate_process_tree(&mut child, supervision.grace_period).await?
        }
    };

    let (stdout, stderr) = tokio::join!(stdout_reader.finish(), stderr_reader.finish());

    Ok(RawTermination::from_status(
        backend,
        reason,
        status,
        stdout,
        stderr,
        started.elapsed(),
    ))
}

/// Background task accumulating one output stream.
///
/// The buffer is shared with the task so whatever was read before an abort
/// is still returned.
pub(crate) struct StreamReader {
    name: &'static str,
    buffer: Arc<Mutex<Captured>>,
    handle: JoinHandle<io::Result<()>>,
}

impl StreamReader {
    pub(crate) fn spawn<R>(name: &'static str, reader: R, cap: Option<usize>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let handle = tokio::spawn(read_stream(name, reader, cap, Arc::clone(&buffer)));
        Self {
            name,
            buffer,
            handle,
        }
    }

    /// Waits (bounded) for the stream to reach EOF and returns what was read.
    pub(crate) async fn finish(mut self) -> Captured {
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut self.handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("Reading {} failed: {e}", self.name),
            Ok(Err(e)) => warn!("{} reader task failed: {e}", self.name),
            Err(_) => {
                warn!(
                    "{} still open {}s after exit, abandoning reader",
                    self.name,
                    DRAIN_TIMEOUT.as_secs()
                );
                self.handle.abort();
            }
        }

        let mut buffer = lock(&self.buffer);
        std::mem::take(&mut *buffer)
    }
}

async fn read_stream<R>(
    name: &'static str,
    mut reader: R,
    cap: Option<usize>,
    buffer: Arc<Mutex<Captured>>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let mut captured = lock(&buffer);
        let room = match cap {
            Some(limit) => limit.saturating_sub(captured.bytes.len()),
            None => n,
        };
        if n > room {
            if !captured.truncated {
                warn!(
                    "{name} exceeded the capture limit of {} bytes, discarding the rest",
                    cap.unwrap_or_default()
                );
                captured.truncated = true;
            }
            captured.bytes.extend_from_slice(&chunk[..room]);
        } else {
            captured.bytes.extend_from_slice(&chunk[..n]);
        }
        // Keep reading past the cap so the child never blocks on a full pipe.
    }

    debug!("{name} closed");
    Ok(())
}

fn lock(buffer: &Mutex<Captured>) -> std::sync::MutexGuard<'_, Captured> {
    buffer.lock().unwrap_or_else(|poison| poison.into_inner())
}
