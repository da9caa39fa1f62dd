// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use quanta_config::SandboxConfig;

/// Events streamed while a sandboxed process runs.  The session host
/// forwards them onto the event bus as `file_run_*` frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxEvent {
    Started { command: String },
    Stdout { chunk: String },
    Stderr { chunk: String },
    Exit {
        exit_code: i32,
        duration_ms: u64,
        timed_out: bool,
    },
}

/// Hard wall-clock limit for one run.  `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTimeout(Option<Duration>);

impl RunTimeout {
    pub const MINUTE: Self = Self(Some(Duration::from_secs(60)));
    pub const FIVE_MINUTES: Self = Self(Some(Duration::from_secs(300)));
    pub const THIRTY_MINUTES: Self = Self(Some(Duration::from_secs(1800)));
    pub const UNLIMITED: Self = Self(None);

    pub fn secs(n: u64) -> Self {
        Self(Some(Duration::from_secs(n)))
    }

    pub fn duration(self) -> Option<Duration> {
        self.0
    }

    /// Accepts the user-selectable values plus humantime syntax.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unlimited" | "none" => Some(Self::UNLIMITED),
            other => humantime_like(other).map(|d| Self(Some(d))),
        }
    }
}

fn humantime_like(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(n) = s.strip_suffix('s') {
        return n.parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(n) = s.strip_suffix('m') {
        return n.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Per-user concurrency cap: one active process per user.
    #[error("a process is already running for this user")]
    Busy,
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Final report for one run.  `output` is the capped transcript (stdout and
/// stderr interleaved in arrival order).
#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit_code: i32,
    pub duration: Duration,
    pub output: String,
    pub timed_out: bool,
    pub cancelled: bool,
    pub truncated: bool,
}

/// Owns the OS processes spawned for shell/exec requests: streams output in
/// real time, enforces the hard timeout, and performs grace-then-kill
/// cancellation.
pub struct SandboxRunner {
    active: Mutex<HashSet<String>>,
    grace: Duration,
    output_cap: usize,
}

struct SlotGuard<'a> {
    runner: &'a SandboxRunner,
    user: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.runner
            .active
            .lock()
            .expect("sandbox slot set poisoned")
            .remove(&self.user);
    }
}

/// Shared output accounting across the stdout and stderr reader tasks.
struct CapState {
    sent: usize,
    cap: usize,
    truncated: bool,
    transcript: String,
}

impl SandboxRunner {
    pub fn new(cfg: &SandboxConfig) -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
            grace: cfg.grace_period(),
            output_cap: cfg.output_cap_bytes,
        }
    }

    pub fn with_limits(grace: Duration, output_cap: usize) -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
            grace,
            output_cap,
        }
    }

    /// Run `command` in `workdir` under the given timeout, streaming output
    /// to `events`.  Returns `Busy` before spawning when the user already
    /// has an active process.
    ///
    /// Cancellation is cooperative: a send on (or drop of) the `cancel`
    /// sender triggers polite termination, then a hard kill after the grace
    /// period.
    pub async fn run(
        &self,
        user_id: &str,
        workdir: &Path,
        command: &str,
        timeout: RunTimeout,
        events: mpsc::Sender<SandboxEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<RunReport, SandboxError> {
        let _slot = self.claim_slot(user_id)?;
        let started = Instant::now();

        debug!(user = user_id, cmd = command, "sandbox run");
        let _ = events
            .send(SandboxEvent::Started {
                command: command.to_string(),
            })
            .await;

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.current_dir(workdir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // setsid() detaches the child from the controlling terminal and puts
        // it in its own process group, so the grace-period SIGTERM reaches
        // the whole tree.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd.spawn()?;

        let cap = Arc::new(Mutex::new(CapState {
            sent: 0,
            cap: self.output_cap,
            truncated: false,
            transcript: String::new(),
        }));

        let out_task = child.stdout.take().map(|pipe| {
            tokio::spawn(stream_pipe(pipe, events.clone(), Arc::clone(&cap), false))
        });
        let err_task = child.stderr.take().map(|pipe| {
            tokio::spawn(stream_pipe(pipe, events.clone(), Arc::clone(&cap), true))
        });

        let mut timed_out = false;
        let mut cancelled = false;
        let status = tokio::select! {
            biased;
            _ = &mut cancel => {
                cancelled = true;
                self.terminate(&mut child).await;
                None
            }
            _ = sleep_until_deadline(timeout) => {
                timed_out = true;
                warn!(cmd = command, "sandbox run hit hard timeout");
                self.terminate(&mut child).await;
                None
            }
            status = child.wait() => Some(status?),
        };

        // Pipes close once the process (and its group) is gone; the reader
        // tasks drain whatever arrived before that.
        if let Some(t) = out_task {
            let _ = t.await;
        }
        if let Some(t) = err_task {
            let _ = t.await;
        }

        let duration = started.elapsed();
        let exit_code = match status {
            Some(s) => s.code().unwrap_or(-1),
            None => -1,
        };
        let _ = events
            .send(SandboxEvent::Exit {
                exit_code,
                duration_ms: duration.as_millis() as u64,
                timed_out,
            })
            .await;

        let capped = cap.lock().expect("cap state poisoned");
        Ok(RunReport {
            exit_code,
            duration,
            output: capped.transcript.clone(),
            timed_out,
            cancelled,
            truncated: capped.truncated,
        })
    }

    fn claim_slot(&self, user_id: &str) -> Result<SlotGuard<'_>, SandboxError> {
        let mut active = self.active.lock().expect("sandbox slot set poisoned");
        if !active.insert(user_id.to_string()) {
            return Err(SandboxError::Busy);
        }
        Ok(SlotGuard {
            runner: self,
            user: user_id.to_string(),
        })
    }

    /// Polite termination, then a hard kill after the grace period.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SIGTERM to the whole process group created by setsid().
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
        }
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

async fn sleep_until_deadline(timeout: RunTimeout) {
    match timeout.duration() {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

async fn stream_pipe<R>(
    pipe: R,
    events: mpsc::Sender<SandboxEvent>,
    cap: Arc<Mutex<CapState>>,
    is_stderr: bool,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let chunk = {
            let mut state = cap.lock().expect("cap state poisoned");
            if state.sent >= state.cap {
                if !state.truncated {
                    state.truncated = true;
                    Some("[output truncated]".to_string())
                } else {
                    None
                }
            } else {
                state.sent += line.len() + 1;
                state.transcript.push_str(&line);
                state.transcript.push('\n');
                Some(line)
            }
        };
        if let Some(chunk) = chunk {
            let event = if is_stderr {
                SandboxEvent::Stderr { chunk }
            } else {
                SandboxEvent::Stdout { chunk }
            };
            if events.send(event).await.is_err() {
                // Consumer gone; keep draining so the pipe never backs up.
                continue;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
