// src/exec/backend.rs

//! Pluggable process backend abstraction.
//!
//! Runners talk to a `ProcessBackend` instead of `tokio::process` directly.
//! This makes it easy to swap in a fake backend in tests while keeping the
//! production implementation in [`process`](super::process).
//!
//! - `RealProcessBackend` spawns OS processes and arms Tokio timers; both
//!   report back to the control loop as `RuntimeEvent::Process(..)`.
//! - Tests can provide their own backend that records spawn requests and
//!   lets the test decide when (and how) each attempt exits.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::engine::{InputReply, ProcessEvent, RunnerId, RuntimeEvent};
use crate::errors::RunnerError;

use super::process::spawn_process;

/// Everything needed to start one attempt of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub runner: RunnerId,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// The child's environment, in order. Empty means "inherit the
    /// parent's".
    pub env: Vec<(String, String)>,
}

/// One line queued for a child's stdin, with the channel its write result
/// is reported on.
#[derive(Debug)]
pub struct StdinLine {
    pub text: String,
    pub reply: InputReply,
}

/// Control handle for a live child process.
///
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    stdin: mpsc::Sender<StdinLine>,
}

impl ProcessHandle {
    pub fn new(
        pid: Option<u32>,
        kill: oneshot::Sender<()>,
        stdin: mpsc::Sender<StdinLine>,
    ) -> Self {
        Self {
            pid,
            kill: Some(kill),
            stdin,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the supervisor to kill the child. Returns false if a kill was
    /// already requested or the supervisor is gone.
    pub fn request_kill(&mut self) -> bool {
        match self.kill.take() {
            Some(kill) => kill.send(()).is_ok(),
            None => false,
        }
    }

    /// Queue a line for the child's stdin. Failures are reported on `reply`.
    pub fn submit_line(&self, text: String, reply: InputReply) {
        if let Err(err) = self.stdin.try_send(StdinLine { text, reply }) {
            let line = match err {
                mpsc::error::TrySendError::Full(line) | mpsc::error::TrySendError::Closed(line) => {
                    line
                }
            };
            let _ = line.reply.send(Err(RunnerError::StdinClosed));
        }
    }
}

/// Cancellable one-shot restart timer. Dropping it cancels the timer.
#[derive(Debug, Default)]
pub struct RestartTimer {
    abort: Option<AbortHandle>,
}

impl RestartTimer {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A timer with nothing behind it (fake backends fire restarts by hand).
    pub fn detached() -> Self {
        Self { abort: None }
    }

    pub fn cancel(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

impl Drop for RestartTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Trait abstracting how script attempts are started and delayed.
///
/// Production code uses [`RealProcessBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ProcessBackend: Send + Sync {
    /// Start one attempt. An `Err` means the OS refused to start the
    /// program (missing, not executable, ...).
    fn spawn(&self, request: SpawnRequest) -> std::io::Result<ProcessHandle>;

    /// Arrange for `ProcessEvent::RestartDue { runner }` to reach the control
    /// loop after `delay`, without blocking it.
    fn schedule_restart(&self, runner: RunnerId, delay: Duration) -> RestartTimer;
}

/// Real backend used in production.
///
/// Holds only a weak sender: the control loop owns this backend, and a
/// strong sender here would keep the loop's own inbound channel open after
/// every command handle is gone.
#[derive(Debug, Clone)]
pub struct RealProcessBackend {
    events: mpsc::WeakSender<RuntimeEvent>,
}

impl RealProcessBackend {
    /// Create a backend wired to the control loop's event channel.
    pub fn new(events: mpsc::WeakSender<RuntimeEvent>) -> Self {
        Self { events }
    }
}

impl ProcessBackend for RealProcessBackend {
    fn spawn(&self, request: SpawnRequest) -> std::io::Result<ProcessHandle> {
        spawn_process(request, self.events.clone())
    }

    fn schedule_restart(&self, runner: RunnerId, delay: Duration) -> RestartTimer {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(%runner, "repeat delay elapsed");
            if let Some(events) = events.upgrade() {
                let _ = events
                    .send(RuntimeEvent::Process(ProcessEvent::RestartDue { runner }))
                    .await;
            }
        });
        RestartTimer::new(handle.abort_handle())
    }
}
