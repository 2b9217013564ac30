// tests/runtime_fake_backend.rs

use std::error::Error;

use tempfile::{TempDir, tempdir};
use tokio::sync::{mpsc, oneshot};

use treerun::engine::{
    ExitInfo, LeafState, OutputStream, ProcessEvent, QueueConfig, QueueEvent, RunWarning,
    Runtime, RuntimeEvent, RuntimeOptions, SinkSlot,
};
use treerun::errors::RunnerError;
use treerun::exec::ChannelSink;
use treerun::project::{NodeId, Project, RunState};
use treerun_test_utils::builders::{ProjectBuilder, ScriptConfigBuilder};
use treerun_test_utils::fake_backend::FakeBackend;
use treerun_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    runtime: Runtime<FakeBackend>,
    backend: FakeBackend,
    events: mpsc::UnboundedReceiver<QueueEvent>,
    _tx: mpsc::Sender<RuntimeEvent>,
    _logs: TempDir,
}

impl Harness {
    fn new(project: Project, options: RuntimeOptions) -> Result<Self, Box<dyn Error>> {
        init_tracing();
        let logs = tempdir()?;
        let backend = FakeBackend::new();
        let (tx, rx) = mpsc::channel(16);
        let (notify, events) = mpsc::unbounded_channel();
        let runtime = Runtime::new(
            project,
            QueueConfig::new(logs.path()),
            backend.clone(),
            rx,
            notify,
            options,
        );
        Ok(Self {
            runtime,
            backend,
            events,
            _tx: tx,
            _logs: logs,
        })
    }

    fn step(&mut self, event: RuntimeEvent) -> bool {
        self.runtime.step(event)
    }

    fn drain(&mut self) -> Vec<QueueEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn leaf(&self, path: &str) -> Result<NodeId, Box<dyn Error>> {
        Ok(self
            .runtime
            .project()
            .find_by_path(path)
            .ok_or(format!("{path} missing"))?)
    }

    fn exit(&mut self, leaf: NodeId, exit: ExitInfo) -> Result<bool, Box<dyn Error>> {
        let runner = self
            .runtime
            .queue()
            .find_runner_for(leaf)
            .ok_or("leaf has no runner")?;
        Ok(self.step(RuntimeEvent::Process(ProcessEvent::Exited { runner, exit })))
    }

    fn run_state(&self, leaf: NodeId) -> Option<RunState> {
        self.runtime.project().node(leaf).map(|n| n.run_state())
    }
}

fn two_leaf_project() -> Project {
    ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new("/s/a.sh"), true)
        .script("G", ScriptConfigBuilder::new("/s/b.sh"), true)
        .build()
}

#[test]
fn project_run_reports_start_states_and_a_single_finish() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;
    let a = h.leaf("G/a.sh")?;
    let b = h.leaf("G/b.sh")?;

    assert!(h.step(RuntimeEvent::RunProject));
    let events = h.drain();
    assert_eq!(events.first(), Some(&QueueEvent::RunningStarted));
    assert!(events.contains(&QueueEvent::StateChanged {
        leaf: a,
        state: LeafState::Running
    }));
    assert_eq!(h.run_state(a), Some(RunState::Running));
    assert_eq!(h.backend.spawn_count(), 2);

    h.exit(a, ExitInfo::exited(0))?;
    h.exit(b, ExitInfo::abnormal())?;
    let events = h.drain();
    assert_eq!(
        events,
        vec![
            QueueEvent::StateChanged {
                leaf: a,
                state: LeafState::Succeeded
            },
            QueueEvent::StateChanged {
                leaf: b,
                state: LeafState::Failed
            },
            QueueEvent::AllFinished,
        ]
    );
    assert_eq!(h.run_state(a), Some(RunState::Completed));
    assert_eq!(h.run_state(b), Some(RunState::Completed));
    Ok(())
}

#[test]
fn second_run_while_running_is_rejected() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;
    let g = h.leaf("G")?;

    h.step(RuntimeEvent::RunProject);
    h.drain();
    h.step(RuntimeEvent::RunSubtree { node: g });

    assert_eq!(h.drain(), vec![QueueEvent::Warning(RunWarning::AlreadyRunning)]);
    assert_eq!(h.backend.spawn_count(), 2);
    Ok(())
}

#[test]
fn nothing_selected_warns_then_finishes() -> TestResult {
    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new("/s/off.sh"), false)
        .build();
    let mut h = Harness::new(project, RuntimeOptions::default())?;
    let g = h.leaf("G")?;

    h.step(RuntimeEvent::RunSubtree { node: g });
    assert_eq!(
        h.drain(),
        vec![
            QueueEvent::Warning(RunWarning::NothingSelected),
            QueueEvent::AllFinished
        ]
    );
    assert_eq!(h.backend.spawn_count(), 0);
    Ok(())
}

#[test]
fn unknown_node_is_a_warning() -> TestResult {
    let mut project = two_leaf_project();
    let a = project.find_by_path("G/a.sh").ok_or("a missing")?;
    project.remove(a)?;
    let mut h = Harness::new(project, RuntimeOptions::default())?;

    h.step(RuntimeEvent::RunSubtree { node: a });
    h.step(RuntimeEvent::RunSingleAgain { leaf: a });
    assert_eq!(
        h.drain(),
        vec![
            QueueEvent::Warning(RunWarning::UnknownNode(a)),
            QueueEvent::Warning(RunWarning::UnknownNode(a)),
        ]
    );
    Ok(())
}

#[test]
fn run_single_again_joins_a_live_cycle() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;
    let a = h.leaf("G/a.sh")?;
    let b = h.leaf("G/b.sh")?;

    h.step(RuntimeEvent::RunProject);
    h.drain();

    h.step(RuntimeEvent::RunSingleAgain { leaf: a });
    assert_eq!(h.drain(), vec![QueueEvent::Warning(RunWarning::LeafBusy(a))]);

    h.exit(a, ExitInfo::exited(0))?;
    h.drain();

    h.step(RuntimeEvent::RunSingleAgain { leaf: a });
    let events = h.drain();
    assert!(!events.contains(&QueueEvent::RunningStarted), "cycle already running");
    assert!(events.contains(&QueueEvent::StateChanged {
        leaf: a,
        state: LeafState::Running
    }));
    assert_eq!(h.backend.spawn_count(), 3);
    assert_eq!(h.runtime.queue().len(), 2, "one runner per leaf");

    h.exit(b, ExitInfo::exited(0))?;
    assert!(!h.drain().contains(&QueueEvent::AllFinished));
    h.exit(a, ExitInfo::exited(0))?;
    assert!(h.drain().contains(&QueueEvent::AllFinished));
    Ok(())
}

#[test]
fn run_single_again_on_an_idle_queue_starts_a_cycle() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;
    let a = h.leaf("G/a.sh")?;

    h.step(RuntimeEvent::RunSingleAgain { leaf: a });
    let events = h.drain();
    assert_eq!(events.first(), Some(&QueueEvent::RunningStarted));
    assert_eq!(h.backend.spawn_count(), 1);

    h.exit(a, ExitInfo::exited(0))?;
    assert_eq!(
        h.drain(),
        vec![
            QueueEvent::StateChanged {
                leaf: a,
                state: LeafState::Succeeded
            },
            QueueEvent::AllFinished
        ]
    );
    Ok(())
}

#[test]
fn status_reflects_the_queue() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;

    let (reply, mut rx) = oneshot::channel();
    h.step(RuntimeEvent::Status { reply });
    let status = rx.try_recv()?;
    assert!(!status.running);
    assert!(status.empty);

    h.step(RuntimeEvent::RunProject);
    let (reply, mut rx) = oneshot::channel();
    h.step(RuntimeEvent::Status { reply });
    let status = rx.try_recv()?;
    assert!(status.running);
    assert!(!status.empty);
    assert_eq!(status.running_count, 2);
    Ok(())
}

#[test]
fn exit_when_idle_and_shutdown_stop_the_loop() -> TestResult {
    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    let mut h = Harness::new(two_leaf_project(), options)?;
    let a = h.leaf("G/a.sh")?;
    let b = h.leaf("G/b.sh")?;

    assert!(h.step(RuntimeEvent::RunProject));
    assert!(h.exit(a, ExitInfo::exited(0))?);
    assert!(!h.exit(b, ExitInfo::exited(0))?);

    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;
    assert!(!h.step(RuntimeEvent::ShutdownRequested));
    Ok(())
}

#[test]
fn stdin_lines_reach_the_process_and_fail_when_not_running() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;
    let a = h.leaf("G/a.sh")?;

    let (reply, mut rx) = oneshot::channel();
    h.step(RuntimeEvent::SendInput {
        leaf: a,
        line: "early".into(),
        reply,
    });
    assert!(matches!(rx.try_recv()?, Err(RunnerError::NotRunning)));

    h.step(RuntimeEvent::RunProject);
    let pid = h
        .runtime
        .queue()
        .runner(a)
        .and_then(|r| r.pid())
        .ok_or("no pid")?;
    let mut stdin = h.backend.take_stdin(pid).ok_or("no stdin")?;

    let (reply, mut rx) = oneshot::channel();
    h.step(RuntimeEvent::SendInput {
        leaf: a,
        line: "yes".into(),
        reply,
    });
    let line = stdin.try_recv()?;
    assert_eq!(line.text, "yes");
    line.reply
        .send(Ok(()))
        .map_err(|_| "reply receiver dropped")?;
    assert!(rx.try_recv()?.is_ok());
    Ok(())
}

#[test]
fn console_attach_replays_the_current_run_then_streams() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;
    let a = h.leaf("G/a.sh")?;

    h.step(RuntimeEvent::RunProject);
    let runner = h.runtime.queue().find_runner_for(a).ok_or("no runner")?;
    h.step(RuntimeEvent::Process(ProcessEvent::Output {
        runner,
        stream: OutputStream::Stdout,
        data: b"before\n".to_vec(),
    }));

    let (console, mut console_rx) = ChannelSink::new();
    let (monitor, mut monitor_rx) = ChannelSink::new();
    h.step(RuntimeEvent::AttachSink {
        leaf: a,
        slot: SinkSlot::Console,
        sink: Box::new(console),
    });
    h.step(RuntimeEvent::AttachSink {
        leaf: a,
        slot: SinkSlot::Monitor,
        sink: Box::new(monitor),
    });
    assert_eq!(console_rx.try_recv()?, "before\n");
    assert!(monitor_rx.try_recv().is_err(), "monitor sees live output only");

    h.step(RuntimeEvent::Process(ProcessEvent::Output {
        runner,
        stream: OutputStream::Stderr,
        data: b"after\n".to_vec(),
    }));
    assert_eq!(console_rx.try_recv()?, "after");
    assert_eq!(monitor_rx.try_recv()?, "after");

    h.step(RuntimeEvent::DetachSink {
        leaf: a,
        slot: SinkSlot::Console,
    });
    h.step(RuntimeEvent::Process(ProcessEvent::Output {
        runner,
        stream: OutputStream::Stdout,
        data: b"later\n".to_vec(),
    }));
    assert!(console_rx.try_recv().is_err());
    assert_eq!(monitor_rx.try_recv()?, "later\n");
    Ok(())
}

#[test]
fn stop_all_kills_every_live_process() -> TestResult {
    let mut h = Harness::new(two_leaf_project(), RuntimeOptions::default())?;

    h.step(RuntimeEvent::RunProject);
    h.step(RuntimeEvent::StopAll);

    for spawn in h.backend.spawns() {
        assert!(h.backend.kill_requested(spawn.pid));
    }
    assert!(h.runtime.queue().is_running(), "exits still pending");
    Ok(())
}
