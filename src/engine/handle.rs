// src/engine/handle.rs

//! Command-side handle to a running control loop.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{Result, TreerunError};
use crate::exec::{OutputSink, RealProcessBackend};
use crate::project::{NodeId, Project};

use super::queue::QueueConfig;
use super::runtime::Runtime;
use super::{QueueEvent, QueueStatus, RuntimeEvent, RuntimeOptions, SinkSlot};

/// Capacity of the control loop's inbound channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cheap, cloneable front door for the UI or CLI.
///
/// Every method is a message to the control loop; none of them waits for a
/// script.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl Orchestrator {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    /// Run a group's subtree, or a single script node.
    pub async fn run_subtree(&self, node: NodeId) -> Result<()> {
        self.send(RuntimeEvent::RunSubtree { node }).await
    }

    pub async fn run_project(&self) -> Result<()> {
        self.send(RuntimeEvent::RunProject).await
    }

    pub async fn run_single_again(&self, leaf: NodeId) -> Result<()> {
        self.send(RuntimeEvent::RunSingleAgain { leaf }).await
    }

    pub async fn stop(&self, leaf: NodeId) -> Result<()> {
        self.send(RuntimeEvent::Stop { leaf }).await
    }

    pub async fn stop_all(&self) -> Result<()> {
        self.send(RuntimeEvent::StopAll).await
    }

    /// Write one line to a running script's stdin and wait for the write.
    pub async fn send_input(&self, leaf: NodeId, line: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::SendInput {
            leaf,
            line: line.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| TreerunError::RuntimeClosed)??;
        Ok(())
    }

    pub async fn attach_sink(
        &self,
        leaf: NodeId,
        slot: SinkSlot,
        sink: impl OutputSink + 'static,
    ) -> Result<()> {
        self.send(RuntimeEvent::AttachSink {
            leaf,
            slot,
            sink: Box::new(sink),
        })
        .await
    }

    pub async fn detach_sink(&self, leaf: NodeId, slot: SinkSlot) -> Result<()> {
        self.send(RuntimeEvent::DetachSink { leaf, slot }).await
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Status { reply }).await?;
        rx.await.map_err(|_| TreerunError::RuntimeClosed)
    }

    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.status().await?.running)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.status().await?.empty)
    }

    /// Stop the loop. Live processes are killed on the way out.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::ShutdownRequested).await
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|e| {
            debug!(event = ?e.0, "runtime gone; command dropped");
            TreerunError::RuntimeClosed
        })
    }
}

/// Start a control loop with the real process backend.
///
/// Returns the command handle, the stream of queue events and the loop's
/// task, which yields the project back when the loop ends.
pub fn spawn_runtime(
    project: Project,
    config: QueueConfig,
    options: RuntimeOptions,
) -> (
    Orchestrator,
    mpsc::UnboundedReceiver<QueueEvent>,
    JoinHandle<Project>,
) {
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();

    let backend = RealProcessBackend::new(tx.downgrade());
    let runtime = Runtime::new(project, config, backend, rx, notify_tx, options);
    let task = tokio::spawn(runtime.run());

    (Orchestrator::new(tx), notify_rx, task)
}
