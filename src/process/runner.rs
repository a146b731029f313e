//! Tokio-backed command runner
//!
//! Races output collection against the deadline and the cancellation token.
//! Children run in their own process group so that anything they fork is
//! killed together with them.

use super::{CommandRunner, CommandSpec, ProcessResult};
use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs commands as local child processes
#[derive(Debug, Default, Clone)]
pub struct TokioRunner;

impl TokioRunner {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }
}

enum Race {
    Finished(std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> KilnResult<ProcessResult> {
        debug!(stage = spec.stage, cwd = %spec.cwd.display(), "Executing: {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| KilnError::command_failed(spec.to_string(), e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Background jobs outlive the shell, so the group is swept on every
        // exit path, including this future being dropped
        let mut group = ProcessGroup(child.id());

        let race = tokio::select! {
            result = collect(&mut child, stdout, stderr) => Race::Finished(result),
            () = tokio::time::sleep(timeout) => Race::TimedOut,
            () = cancel.cancelled() => Race::Cancelled,
        };

        match race {
            Race::Finished(result) => {
                group.kill();
                let (status, out, err) =
                    result.map_err(|e| KilnError::command_failed(spec.to_string(), e))?;
                let exit_code = status.code().unwrap_or(-1);
                debug!(
                    stage = spec.stage,
                    exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Command finished"
                );
                Ok(ProcessResult::from_output(out, err, exit_code))
            }
            Race::TimedOut => {
                warn!(
                    stage = spec.stage,
                    timeout_secs = timeout.as_secs_f64(),
                    "Command timed out, killing process group"
                );
                group.kill();
                reap(&mut child).await;
                Err(KilnError::timeout(spec.stage, timeout.as_secs_f64()))
            }
            Race::Cancelled => {
                debug!(stage = spec.stage, "Command cancelled, killing process group");
                group.kill();
                reap(&mut child).await;
                Err(KilnError::Cancelled)
            }
        }
    }
}

/// Wait for exit while draining both pipes
async fn collect<O, E>(
    child: &mut Child,
    stdout: Option<O>,
    stderr: Option<E>,
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (status, out, err) = tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
    Ok((status?, out?, err?))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Process group of a spawned child, keyed by the pid captured at spawn
///
/// The pid stays valid as a group id after the leader is reaped: the kernel
/// does not hand it out again while any member of the group is alive.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    /// SIGKILL every remaining member; later calls are no-ops
    fn kill(&mut self) {
        if let Some(pid) = self.0.take() {
            kill_group(pid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pid) = self.0 {
            debug!(pid, "Runner dropped mid-flight, killing process group");
        }
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // SAFETY: a negative pid addresses the process group created for the
    // child via process_group(0). ESRCH once the group is empty is expected.
    #[allow(unsafe_code)]
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Kill the direct child if it is still around, then reap it
async fn reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("start_kill after group kill: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to reap killed process: {}", e);
    }
}
