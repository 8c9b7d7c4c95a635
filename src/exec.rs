//! clusteradm subprocess execution
//!
//! All fleet mutations are delegated to the `clusteradm` CLI. Invocations can
//! run for minutes (`--wait=true`), so the runner emits a heartbeat log every
//! 5 seconds while the child is alive. Children are spawned with
//! `kill_on_drop` so that dropping the reconciliation future terminates the
//! subprocess.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::info;

use crate::{Error, Result};

/// The binary all fleet mutations are delegated to
pub const CLUSTERADM: &str = "clusteradm";

/// Interval between heartbeat log lines while a child process runs
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of a completed subprocess invocation
///
/// Combined stdout+stderr is always captured; callers decide how to surface
/// failures so condition messages can name the operation that failed.
#[derive(Clone, Debug)]
pub struct CmdOutput {
    /// Whether the child exited successfully
    pub success: bool,
    /// Human-readable exit status (e.g. "exit status: 1")
    pub status: String,
    /// Combined stdout and stderr
    pub combined: String,
}

impl CmdOutput {
    /// Build an error for a failed invocation, preserving the child's output
    pub fn into_error(self, what: &str) -> Error {
        Error::clusteradm(format!(
            "{}: {}, output: {}",
            what, self.status, self.combined
        ))
    }
}

/// Trait abstracting clusteradm execution
///
/// This trait allows mocking subprocess invocations in tests while shelling
/// out to the real binary in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Clusteradm: Send + Sync {
    /// Run clusteradm with the given arguments, logging `heartbeat` while the
    /// invocation is in flight
    async fn run(&self, args: &[String], heartbeat: &str) -> Result<CmdOutput>;
}

/// clusteradm runner that shells out to the real binary
pub struct ClusteradmCli;

impl ClusteradmCli {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClusteradmCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clusteradm for ClusteradmCli {
    async fn run(&self, args: &[String], heartbeat: &str) -> Result<CmdOutput> {
        run_with_heartbeat(CLUSTERADM, args, heartbeat).await
    }
}

/// Run a command to completion, emitting `message` every 5 seconds.
///
/// Returns the combined stdout+stderr and the exit status. The child is
/// spawned with `kill_on_drop`, so cancelling (dropping) the returned future
/// sends a best-effort kill to the process.
pub async fn run_with_heartbeat(program: &str, args: &[String], message: &str) -> Result<CmdOutput> {
    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::clusteradm(format!("failed to run {program}: {e}")))?;

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    let start = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
    let mut ticker = tokio::time::interval_at(start, HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            res = &mut wait => {
                let out = res.map_err(|e| {
                    Error::clusteradm(format!("failed to wait for {program}: {e}"))
                })?;
                let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&out.stderr));
                return Ok(CmdOutput {
                    success: out.status.success(),
                    status: out
                        .status
                        .code()
                        .map(|c| format!("exit status: {c}"))
                        .unwrap_or_else(|| "killed by signal".to_string()),
                    combined,
                });
            }
            _ = ticker.tick() => {
                info!("{message}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story: Long-Running clusteradm Invocations Stay Observable
    //
    // clusteradm init/join block until the remote operation completes. The
    // runner must capture output, report failure status faithfully, and never
    // hang past cancellation.
    // ==========================================================================

    /// A successful invocation returns its combined output and success status.
    #[tokio::test]
    async fn successful_command_returns_combined_output() {
        let out = run_with_heartbeat("sh", &["-c".into(), "echo ok".into()], "waiting...")
            .await
            .unwrap();
        assert!(out.success);
        assert!(out.combined.contains("ok"));
    }

    /// A failing invocation reports the exit status and preserves stderr.
    #[tokio::test]
    async fn failing_command_reports_exit_status_and_stderr() {
        let out = run_with_heartbeat(
            "sh",
            &["-c".into(), "echo boom >&2; exit 3".into()],
            "waiting...",
        )
        .await
        .unwrap();
        assert!(!out.success);
        assert_eq!(out.status, "exit status: 3");
        assert!(out.combined.contains("boom"));
    }

    /// stdout and stderr are combined into a single stream, like the CLI user
    /// would see in a terminal.
    #[tokio::test]
    async fn stdout_and_stderr_are_combined() {
        let out = run_with_heartbeat(
            "sh",
            &["-c".into(), "echo first; echo second >&2".into()],
            "waiting...",
        )
        .await
        .unwrap();
        assert!(out.combined.contains("first"));
        assert!(out.combined.contains("second"));
    }

    /// A missing binary is an immediate error, not a hang.
    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let result =
            run_with_heartbeat("definitely-not-a-real-binary-xyz", &[], "waiting...").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("failed to run"));
    }

    /// into_error preserves the operation name, status, and output so the
    /// condition message names the offending subsystem.
    #[test]
    fn into_error_formats_operation_status_and_output() {
        let out = CmdOutput {
            success: false,
            status: "exit status: 1".to_string(),
            combined: "some cli output".to_string(),
        };
        let err = out.into_error("failed to init hub");
        let msg = err.to_string();
        assert!(msg.contains("failed to init hub"));
        assert!(msg.contains("exit status: 1"));
        assert!(msg.contains("some cli output"));
    }
}
