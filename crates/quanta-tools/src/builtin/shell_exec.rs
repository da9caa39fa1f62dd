// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use quanta_sandbox::{RunTimeout, SandboxError, SandboxEvent, SandboxRunner};

use crate::tool::{Tool, ToolErrorKind, ToolResult};

/// Run a command in the project sandbox.  Output streams to the session's
/// sandbox-event channel in real time; the tool result carries the capped
/// transcript.
pub struct ShellExecTool {
    runner: Arc<SandboxRunner>,
    events: mpsc::Sender<SandboxEvent>,
    user_id: String,
    workdir: PathBuf,
    default_timeout: RunTimeout,
    /// Session-wide cancel flag; flips to true when the user cancels.
    session_cancel: Option<watch::Receiver<bool>>,
}

impl ShellExecTool {
    pub fn new(
        runner: Arc<SandboxRunner>,
        events: mpsc::Sender<SandboxEvent>,
        user_id: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            events,
            user_id: user_id.into(),
            workdir: workdir.into(),
            default_timeout: RunTimeout::FIVE_MINUTES,
            session_cancel: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: RunTimeout) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_session_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.session_cancel = Some(cancel);
        self
    }
}

#[async_trait]
impl Tool for ShellExecTool {
    fn name(&self) -> &str {
        "shell_exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project sandbox (cwd is the project \
         workspace). stdout/stderr stream to the client in real time and the \
         capped transcript is returned here. timeout accepts 60s, 5m, 30m, \
         or unlimited. One process per user at a time."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to run, e.g. 'python main.py'"
                },
                "timeout": {
                    "type": "string",
                    "enum": ["60s", "5m", "30m", "unlimited"],
                    "description": "Hard wall-clock limit (default 5m)"
                }
            },
            "required": ["command"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let command = args["command"].as_str().unwrap_or_default().to_string();
        let timeout = args["timeout"]
            .as_str()
            .and_then(RunTimeout::parse)
            .unwrap_or(self.default_timeout);

        // Bridge the session cancel flag into this run's oneshot.  Without a
        // flag the sender is parked locally so the run is never cancelled.
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let _keepalive: Option<oneshot::Sender<()>> = match self.session_cancel.clone() {
            Some(mut flag) => {
                tokio::spawn(async move {
                    loop {
                        if *flag.borrow() {
                            let _ = cancel_tx.send(());
                            break;
                        }
                        if flag.changed().await.is_err() {
                            break;
                        }
                    }
                });
                None
            }
            None => Some(cancel_tx),
        };

        debug!(user = %self.user_id, cmd = %command, "shell_exec tool");
        let report = self
            .runner
            .run(
                &self.user_id,
                &self.workdir,
                &command,
                timeout,
                self.events.clone(),
                cancel_rx,
            )
            .await;

        match report {
            Ok(report) if report.cancelled => ToolResult::err(
                ToolErrorKind::Cancelled,
                format!("command cancelled after {:?}", report.duration),
            ),
            Ok(report) if report.timed_out => ToolResult::err(
                ToolErrorKind::SandboxTimeout,
                format!(
                    "command timed out after {:?} (exit -1)\n{}",
                    report.duration, report.output
                ),
            ),
            Ok(report) if report.exit_code != 0 => ToolResult::err(
                ToolErrorKind::ToolIoError,
                format!("[exit {}]\n{}", report.exit_code, report.output),
            ),
            Ok(report) => {
                let out = if report.output.is_empty() {
                    "[exit 0]".to_string()
                } else {
                    report.output
                };
                ToolResult::ok(out)
            }
            Err(SandboxError::Busy) => ToolResult::err(
                ToolErrorKind::SandboxBusy,
                "busy: a process is already running for this user",
            ),
            Err(SandboxError::Spawn(e)) => {
                ToolResult::err(ToolErrorKind::ToolIoError, format!("spawn error: {e}"))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn fixture(cap: usize) -> (tempfile::TempDir, ShellExecTool, mpsc::Receiver<SandboxEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(SandboxRunner::with_limits(Duration::from_millis(500), cap));
        let (tx, rx) = mpsc::channel(256);
        let tool = ShellExecTool::new(runner, tx, "u1", dir.path().to_path_buf());
        (dir, tool, rx)
    }

    #[tokio::test]
    async fn echo_succeeds_with_transcript() {
        let (_dir, tool, _rx) = fixture(100_000);
        let out = tool.invoke(&json!({"command": "echo hello"})).await;
        assert!(out.success, "{}", out.for_model());
        assert!(out.output.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_io_error_with_code() {
        let (_dir, tool, _rx) = fixture(100_000);
        let out = tool.invoke(&json!({"command": "exit 3"})).await;
        let err = out.error.unwrap();
        assert_eq!(err.kind, ToolErrorKind::ToolIoError);
        assert!(err.message.contains("[exit 3]"));
    }

    #[tokio::test]
    async fn timeout_maps_to_sandbox_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(SandboxRunner::with_limits(
            Duration::from_millis(200),
            100_000,
        ));
        let (tx, _rx2) = mpsc::channel(256);
        let tool = ShellExecTool::new(runner, tx, "u1", dir.path().to_path_buf())
            .with_default_timeout(RunTimeout::secs(1));
        let out = tool.invoke(&json!({"command": "sleep 10"})).await;
        assert_eq!(out.error.unwrap().kind, ToolErrorKind::SandboxTimeout);
    }

    #[tokio::test]
    async fn session_cancel_flag_cancels_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(SandboxRunner::with_limits(
            Duration::from_millis(200),
            100_000,
        ));
        let (tx, _rx) = mpsc::channel(256);
        let (flag_tx, flag_rx) = watch::channel(false);
        let tool = ShellExecTool::new(runner, tx, "u1", dir.path().to_path_buf())
            .with_session_cancel(flag_rx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = flag_tx.send(true);
        });
        let out = tool.invoke(&json!({"command": "sleep 30"})).await;
        assert_eq!(out.error.unwrap().kind, ToolErrorKind::Cancelled);
    }
}
