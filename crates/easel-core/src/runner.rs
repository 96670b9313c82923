//! Process runner: spawn one external process and stream its output to the
//! diagnostic router.

use std::io::{PipeReader, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::router::DiagnosticRouter;

/// Exit code reported for a process that was forcibly terminated, either
/// through cancellation or by a signal. No real exit status is negative.
pub const FORCED_TERMINATION: i32 = -1;

const READ_CHUNK: usize = 8 * 1024;

/// How long to keep draining the output pipe after the process is gone.
/// Grandchildren that inherited the pipe can hold it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Spawns processes and forwards their merged stdout/stderr to the router.
///
/// The runner keeps no state between calls apart from the shared router and
/// the publisher tag it writes under, so one instance can serve any number
/// of concurrent invocations.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    router: Arc<DiagnosticRouter>,
    tag: String,
}

impl ProcessRunner {
    /// Create a runner publishing under `tag`.
    pub fn new(router: Arc<DiagnosticRouter>, tag: impl Into<String>) -> Self {
        Self {
            router,
            tag: tag.into(),
        }
    }

    /// The publisher tag this runner writes with.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Run `invocation` to completion, streaming its output to `label`.
    ///
    /// Returns the process exit code. A non-zero code is a normal return.
    /// If `cancel` fires first, the whole process group is killed and
    /// [`FORCED_TERMINATION`] is returned. Only a failure to start the
    /// process is an `Err`.
    pub async fn run(
        &self,
        invocation: Invocation,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        invocation.validate()?;
        if cancel.is_cancelled() {
            debug!(label, command = %invocation, "cancelled before spawn");
            return Ok(FORCED_TERMINATION);
        }
        let start = Instant::now();

        // stdout and stderr share one pipe so the reader sees them in the
        // order the child produced them.
        let (reader, writer) =
            std::io::pipe().map_err(|e| Error::io("failed to create output pipe", e))?;
        let writer_err = writer
            .try_clone()
            .map_err(|e| Error::io("failed to duplicate output pipe", e))?;

        let mut cmd = invocation.to_command();
        cmd.stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err)
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let spawned = cmd.spawn();
        // The command still owns the parent's copies of the write end; the
        // reader only sees EOF once they are gone.
        drop(cmd);
        let mut child = spawned.map_err(|e| Error::startup(invocation.args(), e.to_string()))?;
        let pid = child.id();

        info!(
            pid,
            label,
            program = invocation.program().unwrap_or_default(),
            "process started"
        );

        let pump = {
            let router = Arc::clone(&self.router);
            let tag = self.tag.clone();
            let label = label.to_string();
            tokio::task::spawn_blocking(move || pump_output(reader, &router, &tag, &label))
        };

        let status = tokio::select! {
            waited = child.wait() => Some(waited.map_err(|e| {
                Error::io(format!("failed to wait on {}", invocation), e)
            })?),
            _ = cancel.cancelled() => {
                kill_process_tree(&mut child, pid).await;
                None
            }
        };

        match tokio::time::timeout(DRAIN_GRACE, pump).await {
            Ok(Ok(bytes)) => debug!(pid, label, bytes, "output drained"),
            Ok(Err(e)) => warn!(pid, label, error = %e, "output reader task failed"),
            Err(_) => warn!(pid, label, "output pipe still open after exit, detaching reader"),
        }

        let exit_code = match status {
            Some(status) => exit_code(&status),
            None => FORCED_TERMINATION,
        };
        info!(
            pid,
            label,
            exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "process finished"
        );
        Ok(exit_code)
    }
}

/// Blocking read loop; runs on a dedicated blocking worker.
fn pump_output(mut reader: PipeReader, router: &DiagnosticRouter, tag: &str, label: &str) -> u64 {
    let mut buf = [0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                router.write(tag, label, &buf[..n]);
                total += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(label, error = %e, "error reading process output");
                break;
            }
        }
    }
    total
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        debug!(signal = status.signal(), "process terminated by signal");
    }
    FORCED_TERMINATION
}

async fn kill_process_tree(child: &mut tokio::process::Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // The child leads its own process group; take the whole group down
        // so grandchildren do not keep the output pipe open.
        // SAFETY: pid is a child we spawned and have not reaped yet.
        let ret = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if ret != 0 {
            debug!(pid, "process group kill failed, falling back to direct kill");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(?pid, error = %e, "kill after group signal reported an error");
    }
    warn!(?pid, "process forcibly terminated");
}
