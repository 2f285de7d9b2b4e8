//! Service lifecycle probe: start an external long-running process, keep it
//! under observation, then stop it with a bounded graceful-shutdown wait.
//!
//! This is a test harness, not a supervisor: there is no restart-on-crash
//! and no backoff, only fixed waits with a kill fallback.

use crate::error::ProbeError;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A spawned service process with continuously captured output.
///
/// The child is spawned with `kill_on_drop`, so dropping the handle on any
/// exit path (including an interrupt) reaps the process.
#[derive(Debug)]
pub struct ServiceHandle {
    child: Child,
    pid: Option<u32>,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
}

impl ServiceHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn captured_stdout(&self) -> String {
        self.stdout.lock().await.clone()
    }

    pub async fn captured_stderr(&self) -> String {
        self.stderr.lock().await.clone()
    }
}

#[derive(Debug)]
pub struct MonitorOutcome {
    pub unexpected_exit: bool,
    pub elapsed: Duration,
    pub status: Option<ExitStatus>,
}

/// Launch `command args...` and wait out the startup grace period.
///
/// Fails with [`ProbeError::Startup`] carrying the captured output if the
/// process has already exited when the grace period ends.
pub async fn start(
    command: &str,
    args: &[&str],
    grace: Duration,
) -> Result<ServiceHandle, ProbeError> {
    let mut child = Command::new(command)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ProbeError::Startup {
            status: format!("spawn failed: {e}"),
            stdout: String::new(),
            stderr: String::new(),
        })?;

    let pid = child.id();
    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());

    info!(
        command,
        pid,
        grace_secs = grace.as_secs_f64(),
        "service launched, waiting out grace period"
    );
    tokio::time::sleep(grace).await;

    match child.try_wait() {
        Ok(Some(status)) => {
            // Let the capture tasks drain what is left in the pipes.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(ProbeError::Startup {
                status: status.to_string(),
                stdout: stdout.lock().await.clone(),
                stderr: stderr.lock().await.clone(),
            })
        }
        Ok(None) => Ok(ServiceHandle {
            child,
            pid,
            stdout,
            stderr,
        }),
        Err(e) => {
            warn!(error = %e, "could not poll service status, assuming alive");
            Ok(ServiceHandle {
                child,
                pid,
                stdout,
                stderr,
            })
        }
    }
}

/// Poll liveness every `interval` until `duration` elapses.
///
/// Returns within one interval of an early exit rather than waiting out the
/// full window.
pub async fn monitor(
    handle: &mut ServiceHandle,
    duration: Duration,
    interval: Duration,
) -> MonitorOutcome {
    let started = Instant::now();
    loop {
        let elapsed = started.elapsed();
        if elapsed >= duration {
            return MonitorOutcome {
                unexpected_exit: false,
                elapsed,
                status: None,
            };
        }

        match handle.child.try_wait() {
            Ok(Some(status)) => {
                warn!(
                    %status,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "service exited during observation window"
                );
                return MonitorOutcome {
                    unexpected_exit: true,
                    elapsed,
                    status: Some(status),
                };
            }
            Ok(None) => {
                debug!(elapsed_secs = elapsed.as_secs_f64(), "service alive");
            }
            Err(e) => {
                warn!(error = %e, "could not poll service status");
            }
        }

        tokio::time::sleep(interval.min(duration - elapsed)).await;
    }
}

/// Request graceful termination (SIGTERM on Unix), waiting up to
/// `grace_timeout` before forcing a kill.
///
/// Never errors: every termination failure falls through to the kill path.
/// Returns `true` iff the shutdown was graceful.
pub async fn stop(mut handle: ServiceHandle, grace_timeout: Duration) -> bool {
    if let Ok(Some(status)) = handle.child.try_wait() {
        info!(%status, "service already exited before shutdown request");
        return true;
    }

    if let Some(pid) = handle.pid {
        terminate(pid);
    }

    match tokio::time::timeout(grace_timeout, handle.child.wait()).await {
        Ok(Ok(status)) => {
            info!(%status, "service stopped gracefully");
            true
        }
        Ok(Err(e)) => {
            warn!(error = %e, "waiting for service exit failed, killing");
            force_kill(&mut handle.child).await;
            false
        }
        Err(_) => {
            warn!(
                timeout_secs = grace_timeout.as_secs_f64(),
                "graceful shutdown timed out, killing"
            );
            force_kill(&mut handle.child).await;
            false
        }
    }
}

fn capture<R>(reader: Option<R>) -> Arc<Mutex<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(String::new()));
    if let Some(reader) = reader {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buffer = buffer.lock().await;
                buffer.push_str(&line);
                buffer.push('\n');
            }
        });
    }
    buffer
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {
    // No graceful signal available; the timeout path force-kills instead.
}

async fn force_kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "force kill failed");
    }
}
