// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::exec::ProcessBackend;
use crate::project::{NodeId, Project, RunState};
use crate::select::{RunRequest, select, select_single};

use super::queue::{ExecutionQueue, QueueConfig};
use super::{LeafState, QueueEvent, QueueStatus, RunWarning, RuntimeEvent, RuntimeOptions};

/// The single control loop.
///
/// Owns the project tree and the execution queue. Every command and every
/// process notification arrives as a `RuntimeEvent` and is handled to
/// completion by [`Runtime::step`] before the next one is read; nothing in
/// here ever waits on a child process. Resulting `QueueEvent`s go out on an
/// unbounded channel so a slow consumer cannot stall the loop.
pub struct Runtime<B: ProcessBackend> {
    project: Project,
    queue: ExecutionQueue,
    backend: B,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    notify: mpsc::UnboundedSender<QueueEvent>,
    options: RuntimeOptions,
}

impl<B: ProcessBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<B: ProcessBackend> Runtime<B> {
    pub fn new(
        project: Project,
        config: QueueConfig,
        backend: B,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        notify: mpsc::UnboundedSender<QueueEvent>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            project,
            queue: ExecutionQueue::new(config),
            backend,
            event_rx,
            notify,
            options,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// Main event loop.
    ///
    /// Runs until a shutdown is requested, the event channel closes (every
    /// command handle dropped), or (with `exit_when_idle`) a run cycle
    /// finishes. Live processes are killed on the way out. Returns the
    /// project with its updated run states.
    pub async fn run(mut self) -> Project {
        info!("treerun runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            if !self.step(event) {
                break;
            }
        }

        self.queue.clear();
        info!("runtime exiting");
        self.project
    }

    /// Handle one event. Returns false when the loop should stop.
    pub fn step(&mut self, event: RuntimeEvent) -> bool {
        if !matches!(event, RuntimeEvent::Process(_)) {
            debug!(event = ?event, "runtime received event");
        }

        match event {
            RuntimeEvent::Process(event) => {
                let events = self.queue.handle_process_event(event, &self.backend);
                self.publish(events)
            }
            RuntimeEvent::RunSubtree { node } => self.start_run(RunRequest::Node(node)),
            RuntimeEvent::RunProject => self.start_run(RunRequest::Project),
            RuntimeEvent::RunSingleAgain { leaf } => self.run_single_again(leaf),
            RuntimeEvent::Stop { leaf } => {
                if !self.queue.stop(leaf) {
                    debug!(%leaf, "stop: nothing to kill");
                }
                true
            }
            RuntimeEvent::StopAll => {
                let killed = self.queue.stop_all();
                info!(killed, "stop all requested");
                true
            }
            RuntimeEvent::SendInput { leaf, line, reply } => {
                self.queue.send_input(leaf, line, reply);
                true
            }
            RuntimeEvent::AttachSink { leaf, slot, sink } => {
                if !self.queue.attach_sink(leaf, slot, sink) {
                    debug!(%leaf, ?slot, "attach: leaf has no runner");
                }
                true
            }
            RuntimeEvent::DetachSink { leaf, slot } => {
                self.queue.detach_sink(leaf, slot);
                true
            }
            RuntimeEvent::Status { reply } => {
                let _ = reply.send(QueueStatus {
                    running: self.queue.is_running(),
                    empty: self.queue.is_empty(),
                    running_count: self.queue.running_count(),
                });
                true
            }
            RuntimeEvent::ShutdownRequested => {
                info!("shutdown requested; stopping runtime");
                false
            }
        }
    }

    /// Subtree or whole-project run: replaces the previous queue.
    fn start_run(&mut self, request: RunRequest) -> bool {
        if self.queue.is_running() {
            warn!(?request, "run rejected; a run is already in progress");
            return self.publish(vec![QueueEvent::Warning(RunWarning::AlreadyRunning)]);
        }
        if let RunRequest::Node(node) = request {
            if self.project.node(node).is_none() {
                return self.publish(vec![QueueEvent::Warning(RunWarning::UnknownNode(node))]);
            }
        }

        self.queue.clear();
        let selection = select(&self.project, request);
        info!(?request, selected = selection.len(), "run requested");

        let mut events = Vec::new();
        if selection.is_empty() {
            warn!("nothing selected to run");
            events.push(QueueEvent::Warning(RunWarning::NothingSelected));
        } else {
            self.queue.build(&self.project, &selection);
            events.push(QueueEvent::RunningStarted);
        }
        events.extend(self.queue.run_all(&self.backend));
        self.publish(events)
    }

    /// Re-run one leaf without touching its siblings, even mid-cycle.
    fn run_single_again(&mut self, leaf: NodeId) -> bool {
        if self.project.node(leaf).is_none() {
            return self.publish(vec![QueueEvent::Warning(RunWarning::UnknownNode(leaf))]);
        }
        if self.queue.runner(leaf).is_some_and(|r| r.is_running()) {
            return self.publish(vec![QueueEvent::Warning(RunWarning::LeafBusy(leaf))]);
        }

        let was_idle = !self.queue.is_running();
        let selection = select_single(&self.project, leaf);
        let mut events = Vec::new();

        if selection.is_empty() {
            warn!(%leaf, "script is disabled; nothing to run");
            events.push(QueueEvent::Warning(RunWarning::NothingSelected));
            if was_idle {
                events.push(QueueEvent::AllFinished);
            }
            return self.publish(events);
        }

        self.queue.build(&self.project, &selection);
        if was_idle {
            events.push(QueueEvent::RunningStarted);
        }
        events.extend(self.queue.run_single(leaf, &self.backend));
        self.publish(events)
    }

    /// Apply leaf state changes to the tree and forward every event.
    fn publish(&mut self, events: Vec<QueueEvent>) -> bool {
        let mut keep_running = true;

        for event in events {
            match &event {
                QueueEvent::StateChanged { leaf, state } => {
                    if let Some(node) = self.project.node_mut(*leaf) {
                        node.set_run_state(match state {
                            LeafState::Running => RunState::Running,
                            LeafState::Succeeded | LeafState::Failed => RunState::Completed,
                        });
                    }
                }
                QueueEvent::AllFinished if self.options.exit_when_idle => {
                    info!("run finished and exit_when_idle is set; stopping runtime");
                    keep_running = false;
                }
                _ => {}
            }

            if self.notify.send(event).is_err() {
                debug!("no event listener; dropping queue event");
            }
        }

        keep_running
    }
}
