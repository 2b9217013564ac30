// src/engine/mod.rs

//! Orchestration engine for treerun.
//!
//! This module ties together:
//! - the execution queue (one runner per selected leaf, completion
//!   aggregation)
//! - the control loop that reacts to:
//!   - run / stop / input commands from the UI or CLI
//!   - process output and exit notifications
//!   - repeat-delay timers
//!   - shutdown requests
//!
//! Every state change happens on that single loop; process I/O tasks and
//! timers only ever push [`RuntimeEvent`]s into it.

use std::fmt;

use tokio::sync::oneshot;

use crate::errors::RunnerError;
use crate::exec::OutputSink;
use crate::project::NodeId;

pub mod handle;
pub mod queue;
pub mod runtime;

pub use handle::{Orchestrator, spawn_runtime};
pub use queue::{ExecutionQueue, QueueConfig, QueueEntry};
pub use runtime::Runtime;

/// Identity of one runner. Unique for the lifetime of its queue, including
/// across `clear()`, so late notifications from torn-down runners are
/// recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerId(pub(crate) u64);

impl RunnerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runner-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How a process attempt ended.
///
/// `graceful` is true when the process exited on its own with an exit code,
/// whatever that code is. Signals and failed waits are abnormal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub graceful: bool,
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        let code = status.code();
        Self {
            graceful: code.is_some(),
            code,
        }
    }

    pub fn exited(code: i32) -> Self {
        Self {
            graceful: true,
            code: Some(code),
        }
    }

    pub fn abnormal() -> Self {
        Self {
            graceful: false,
            code: None,
        }
    }
}

/// Terminal result of a runner. Only graceful vs abnormal matters, never the
/// exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

/// Leaf status as reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafState {
    Running,
    Succeeded,
    Failed,
}

impl From<RunOutcome> for LeafState {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success => LeafState::Succeeded,
            RunOutcome::Failure => LeafState::Failed,
        }
    }
}

/// Which attachable output consumer a sink command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkSlot {
    /// Live console for a single script; replays the current run's output on
    /// attach.
    Console,
    /// Multi-pane monitor view; only sees output produced after attach.
    Monitor,
}

/// Notifications produced by process I/O tasks and restart timers.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A chunk of raw bytes from one of the child's output streams.
    Output {
        runner: RunnerId,
        stream: OutputStream,
        data: Vec<u8>,
    },
    /// The child exited. Sent after both output streams have drained.
    Exited { runner: RunnerId, exit: ExitInfo },
    /// A repeat delay elapsed.
    RestartDue { runner: RunnerId },
}

pub type InputReply = oneshot::Sender<Result<(), RunnerError>>;

/// Everything the control loop reacts to.
pub enum RuntimeEvent {
    /// Run a group's subtree, or a single script.
    RunSubtree { node: NodeId },
    /// Run every enabled top-level group.
    RunProject,
    /// Re-run one leaf without touching its siblings.
    RunSingleAgain { leaf: NodeId },
    Stop { leaf: NodeId },
    StopAll,
    /// Write one line to a running script's stdin.
    SendInput {
        leaf: NodeId,
        line: String,
        reply: InputReply,
    },
    AttachSink {
        leaf: NodeId,
        slot: SinkSlot,
        sink: Box<dyn OutputSink>,
    },
    DetachSink { leaf: NodeId, slot: SinkSlot },
    Status { reply: oneshot::Sender<QueueStatus> },
    Process(ProcessEvent),
    /// Graceful shutdown requested (e.g. Ctrl-C twice, or the host closing).
    ShutdownRequested,
}

impl fmt::Debug for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeEvent::RunSubtree { node } => {
                f.debug_struct("RunSubtree").field("node", node).finish()
            }
            RuntimeEvent::RunProject => f.write_str("RunProject"),
            RuntimeEvent::RunSingleAgain { leaf } => {
                f.debug_struct("RunSingleAgain").field("leaf", leaf).finish()
            }
            RuntimeEvent::Stop { leaf } => f.debug_struct("Stop").field("leaf", leaf).finish(),
            RuntimeEvent::StopAll => f.write_str("StopAll"),
            RuntimeEvent::SendInput { leaf, line, .. } => f
                .debug_struct("SendInput")
                .field("leaf", leaf)
                .field("line", line)
                .finish_non_exhaustive(),
            RuntimeEvent::AttachSink { leaf, slot, .. } => f
                .debug_struct("AttachSink")
                .field("leaf", leaf)
                .field("slot", slot)
                .finish_non_exhaustive(),
            RuntimeEvent::DetachSink { leaf, slot } => f
                .debug_struct("DetachSink")
                .field("leaf", leaf)
                .field("slot", slot)
                .finish(),
            RuntimeEvent::Status { .. } => f.write_str("Status"),
            RuntimeEvent::Process(event) => f.debug_tuple("Process").field(event).finish(),
            RuntimeEvent::ShutdownRequested => f.write_str("ShutdownRequested"),
        }
    }
}

/// Non-fatal reasons a command did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RunWarning {
    #[error("nothing to run: select at least one enabled script")]
    NothingSelected,
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("unknown project node {0}")]
    UnknownNode(NodeId),
    #[error("script {0} is still running")]
    LeafBusy(NodeId),
}

/// Notifications for the UI / CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    RunningStarted,
    AllFinished,
    StateChanged { leaf: NodeId, state: LeafState },
    OutputChunk {
        leaf: NodeId,
        stream: OutputStream,
        text: String,
    },
    Warning(RunWarning),
}

/// Answer to a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub running: bool,
    pub empty: bool,
    pub running_count: usize,
}

/// Runtime options used by the control loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, stop the loop as soon as a run cycle reports `AllFinished`
    /// (used by the CLI).
    pub exit_when_idle: bool,
}
