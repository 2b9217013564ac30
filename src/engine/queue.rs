// src/engine/queue.rs

//! Execution queue: the runner set of one run request.
//!
//! The queue owns one `ScriptRunner` per selected leaf, launches them, and
//! aggregates their terminal outcomes into a single `AllFinished` per run
//! cycle. It is synchronous: callers hand it process notifications and get
//! back the `QueueEvent`s to publish.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::engine::{
    InputReply, LeafState, ProcessEvent, QueueEvent, RunOutcome, RunnerId, SinkSlot,
};
use crate::errors::RunnerError;
use crate::exec::{OutputSink, ProcessBackend, RunnerOptions, RunnerPhase, ScriptRunner};
use crate::project::{NodeId, Project};
use crate::select::{SelectedScript, log_path};

/// Settings a queue is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Base directory for persistent `.log` files.
    pub log_dir: PathBuf,
    pub runner: RunnerOptions,
}

impl QueueConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            runner: RunnerOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct QueueEntry {
    pub runner: ScriptRunner,
    pub leaf: NodeId,
    /// Enclosing group names at selection time, outermost first.
    pub ancestors: Vec<String>,
}

#[derive(Debug)]
pub struct ExecutionQueue {
    config: QueueConfig,
    entries: BTreeMap<RunnerId, QueueEntry>,
    by_leaf: HashMap<NodeId, RunnerId>,
    running_count: usize,
    running: bool,
    next_runner: u64,
}

impl ExecutionQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
            by_leaf: HashMap::new(),
            running_count: 0,
            running: false,
            next_runner: 1,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create one runner per selected leaf.
    ///
    /// A leaf that already has an entry gets a fresh runner in its place, so
    /// a queue never holds two runners for the same leaf.
    pub fn build(&mut self, project: &Project, selection: &[SelectedScript]) -> Vec<RunnerId> {
        let mut ids = Vec::with_capacity(selection.len());

        for selected in selection {
            let Some(script) = project.node(selected.leaf).and_then(|n| n.script()) else {
                debug!(leaf = %selected.leaf, "selected node is not a script; skipped");
                continue;
            };

            let id = RunnerId(self.next_runner);
            self.next_runner += 1;

            let log_path = log_path(&self.config.log_dir, &selected.ancestors, &script.base_name());
            let runner = ScriptRunner::new(
                id,
                project.path_of(selected.leaf),
                script.clone(),
                log_path,
                self.config.runner,
            );

            if let Some(old) = self.by_leaf.insert(selected.leaf, id) {
                if let Some(mut entry) = self.entries.remove(&old) {
                    entry.runner.shutdown();
                }
                debug!(leaf = %selected.leaf, old = %old, new = %id, "replaced runner");
            }

            self.entries.insert(
                id,
                QueueEntry {
                    runner,
                    leaf: selected.leaf,
                    ancestors: selected.ancestors.clone(),
                },
            );
            ids.push(id);
        }

        debug!(built = ids.len(), total = self.entries.len(), "queue built");
        ids
    }

    /// Launch every idle entry without waiting for any of them.
    ///
    /// All launches are counted before the first one starts, and outcomes
    /// that happen during launch are handled afterwards, so `AllFinished`
    /// cannot fire halfway through.
    pub fn run_all(&mut self, backend: &dyn ProcessBackend) -> Vec<QueueEvent> {
        let ids: Vec<RunnerId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.runner.phase() == RunnerPhase::Idle)
            .map(|(id, _)| *id)
            .collect();

        if ids.is_empty() {
            info!("nothing to launch");
            return vec![QueueEvent::AllFinished];
        }

        self.running = true;
        self.running_count += ids.len();
        info!(count = ids.len(), "launching scripts");

        let mut events = Vec::new();
        let mut ended = Vec::new();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(&id) {
                events.push(QueueEvent::StateChanged {
                    leaf: entry.leaf,
                    state: LeafState::Running,
                });
                if let Some(outcome) = entry.runner.start(backend) {
                    ended.push((id, outcome));
                }
            }
        }

        for (id, outcome) in ended {
            self.on_terminal(id, outcome, &mut events);
        }
        events
    }

    /// Launch the already-built entry of one leaf.
    pub fn run_single(&mut self, leaf: NodeId, backend: &dyn ProcessBackend) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        let Some(id) = self.by_leaf.get(&leaf).copied() else {
            debug!(%leaf, "run_single: no entry for leaf");
            return events;
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return events;
        };
        if entry.runner.phase() != RunnerPhase::Idle {
            debug!(%leaf, runner = %id, "run_single: runner already used");
            return events;
        }

        self.running = true;
        self.running_count += 1;
        events.push(QueueEvent::StateChanged {
            leaf,
            state: LeafState::Running,
        });

        if let Some(outcome) = entry.runner.start(backend) {
            self.on_terminal(id, outcome, &mut events);
        }
        events
    }

    /// Route a process notification to its runner. Notifications for runners
    /// that no longer exist are dropped.
    pub fn handle_process_event(
        &mut self,
        event: ProcessEvent,
        backend: &dyn ProcessBackend,
    ) -> Vec<QueueEvent> {
        let mut events = Vec::new();

        let runner = match &event {
            ProcessEvent::Output { runner, .. }
            | ProcessEvent::Exited { runner, .. }
            | ProcessEvent::RestartDue { runner } => *runner,
        };
        let Some(entry) = self.entries.get_mut(&runner) else {
            debug!(%runner, "stale process notification dropped");
            return events;
        };
        let leaf = entry.leaf;

        let ended = match event {
            ProcessEvent::Output { stream, data, .. } => {
                if let Some(text) = entry.runner.on_output(stream, &data) {
                    events.push(QueueEvent::OutputChunk { leaf, stream, text });
                }
                None
            }
            ProcessEvent::Exited { exit, .. } => entry.runner.on_exit(exit, backend),
            ProcessEvent::RestartDue { .. } => entry.runner.on_restart_due(backend),
        };

        if let Some(outcome) = ended {
            self.on_terminal(runner, outcome, &mut events);
        }
        events
    }

    fn on_terminal(&mut self, id: RunnerId, outcome: RunOutcome, events: &mut Vec<QueueEvent>) {
        let Some(leaf) = self.find_leaf_for(id) else {
            return;
        };

        self.running_count = self.running_count.saturating_sub(1);
        events.push(QueueEvent::StateChanged {
            leaf,
            state: outcome.into(),
        });
        debug!(runner = %id, %leaf, ?outcome, remaining = self.running_count, "runner finished");

        if self.running && self.running_count == 0 {
            self.running = false;
            info!("all scripts finished");
            events.push(QueueEvent::AllFinished);
        }
    }

    /// Release every runner, killing live processes and cancelling pending
    /// restarts. Runner ids keep counting up.
    pub fn clear(&mut self) {
        for entry in self.entries.values_mut() {
            entry.runner.shutdown();
        }
        if !self.entries.is_empty() {
            debug!(count = self.entries.len(), "queue cleared");
        }
        self.entries.clear();
        self.by_leaf.clear();
        self.running_count = 0;
        self.running = false;
    }

    /// Returns true if a kill was requested.
    pub fn stop(&mut self, leaf: NodeId) -> bool {
        self.runner_mut(leaf)
            .map(ScriptRunner::stop)
            .unwrap_or(false)
    }

    /// Returns the number of processes a kill was requested for.
    pub fn stop_all(&mut self) -> usize {
        self.entries
            .values_mut()
            .map(|e| e.runner.stop())
            .filter(|killed| *killed)
            .count()
    }

    pub fn send_input(&mut self, leaf: NodeId, line: String, reply: InputReply) {
        match self.runner_mut(leaf) {
            Some(runner) => runner.send_input(line, reply),
            None => {
                let _ = reply.send(Err(RunnerError::NotRunning));
            }
        }
    }

    /// Returns false if the leaf has no runner in this queue.
    pub fn attach_sink(&mut self, leaf: NodeId, slot: SinkSlot, sink: Box<dyn OutputSink>) -> bool {
        match self.runner_mut(leaf) {
            Some(runner) => {
                runner.attach_sink(slot, sink);
                true
            }
            None => false,
        }
    }

    pub fn detach_sink(&mut self, leaf: NodeId, slot: SinkSlot) {
        if let Some(runner) = self.runner_mut(leaf) {
            runner.detach_sink(slot);
        }
    }

    pub fn find_leaf_for(&self, runner: RunnerId) -> Option<NodeId> {
        self.entries.get(&runner).map(|e| e.leaf)
    }

    pub fn find_runner_for(&self, leaf: NodeId) -> Option<RunnerId> {
        self.by_leaf.get(&leaf).copied()
    }

    pub fn runner(&self, leaf: NodeId) -> Option<&ScriptRunner> {
        let id = self.by_leaf.get(&leaf)?;
        self.entries.get(id).map(|e| &e.runner)
    }

    fn runner_mut(&mut self, leaf: NodeId) -> Option<&mut ScriptRunner> {
        let id = self.by_leaf.get(&leaf)?;
        self.entries.get_mut(id).map(|e| &mut e.runner)
    }

    /// Entries in launch order.
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    /// True from the first launch of a cycle until its `AllFinished`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn running_count(&self) -> usize {
        self.running_count
    }
}
