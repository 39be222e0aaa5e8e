//! Agent process spawning and termination.
//!
//! Launches the agent executable with its fixed protocol subcommand, pipes
//! all three standard streams, and drains stderr line-by-line into tracing.
//! Stderr output is diagnostic only and never feeds protocol logic.
//!
//! The child environment is the ambient environment merged with the
//! configured overrides; overrides win on key collisions.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::{AppError, Result};

/// A freshly spawned agent process with its protocol streams detached.
#[derive(Debug)]
pub struct SpawnedAgent {
    /// Child process handle. `kill_on_drop` is set so an abandoned handle
    /// cannot leak a live process.
    pub child: Child,
    /// Agent's stdin, the outbound protocol stream.
    pub stdin: ChildStdin,
    /// Agent's stdout, the inbound protocol stream.
    pub stdout: ChildStdout,
    /// Handle of the background stderr drain task.
    pub stderr_task: JoinHandle<()>,
}

/// Spawn the agent executable with the configured subcommand.
///
/// Failure to spawn is the only hard-fatal startup condition.
///
/// # Errors
///
/// - `AppError::Acp("failed to spawn agent: …")` — OS spawn failure.
/// - `AppError::Acp("failed to capture …")` — a stdio pipe was not created.
pub fn spawn_agent(config: &AgentConfig) -> Result<SpawnedAgent> {
    let mut cmd = Command::new(&config.path);
    cmd.arg(&config.subcommand);

    // Ambient environment merged with configured overrides.
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    info!(path = %config.path, subcommand = %config.subcommand, "spawning agent process");

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Acp(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Acp("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Acp("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Acp("failed to capture agent stderr".into()))?;

    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if !line.is_empty() {
                info!(target: "agent_stderr", "{line}");
            }
        }
        debug!("agent stderr stream closed");
    });

    Ok(SpawnedAgent {
        child,
        stdin,
        stdout,
        stderr_task,
    })
}

/// Terminate the child: request a graceful exit, wait up to `grace`, then
/// force-kill. The child is gone when this returns.
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    request_graceful_exit(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(?status, "agent process exited within grace period");
        }
        Ok(Err(err)) => {
            warn!(%err, "error waiting for agent process");
        }
        Err(_) => {
            warn!("agent process did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to force-kill agent process");
            }
        }
    }
}

/// Ask the child to exit on its own terms.
#[cfg(unix)]
fn request_graceful_exit(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    #[allow(clippy::cast_possible_wrap)]
    let pid = Pid::from_raw(pid as i32);
    if let Err(err) = kill(pid, Signal::SIGTERM) {
        debug!(%err, "SIGTERM delivery failed; relying on grace-period kill");
    }
}

/// On non-unix targets there is no portable graceful signal; the grace-period
/// wait in [`terminate_child`] still lets the child react to stdin EOF.
#[cfg(not(unix))]
fn request_graceful_exit(_child: &Child) {}
