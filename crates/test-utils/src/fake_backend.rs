use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use treerun::engine::RunnerId;
use treerun::exec::{ProcessBackend, ProcessHandle, RestartTimer, SpawnRequest, StdinLine};

/// One recorded spawn.
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub request: SpawnRequest,
    pub pid: u32,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct FakeState {
    spawns: Vec<SpawnRecord>,
    restarts: Vec<(RunnerId, Duration)>,
    failing: HashSet<PathBuf>,
    fail_all: bool,
    next_pid: u32,
    kills: HashMap<u32, oneshot::Receiver<()>>,
    killed: HashSet<u32>,
    stdin: HashMap<u32, mpsc::Receiver<StdinLine>>,
}

/// A fake process backend that:
/// - records every spawn request instead of starting a process
/// - refuses to spawn configured programs (or everything)
/// - records restart delays and never fires them; tests deliver
///   `ProcessEvent::RestartDue` themselves
/// - remembers which fake processes were asked to die
///
/// Exits are never produced on their own: the test decides when and how each
/// attempt ends by feeding `ProcessEvent::Exited`.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make spawning `program` fail with `NotFound`.
    pub fn fail_program(&self, program: impl AsRef<Path>) {
        self.lock().failing.insert(program.as_ref().to_path_buf());
    }

    /// Make every spawn fail.
    pub fn fail_all_spawns(&self) {
        self.lock().fail_all = true;
    }

    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.lock().spawns.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.lock().spawns.len()
    }

    /// Spawns of one runner, in order.
    pub fn spawns_for(&self, runner: RunnerId) -> Vec<SpawnRecord> {
        self.lock()
            .spawns
            .iter()
            .filter(|s| s.request.runner == runner)
            .cloned()
            .collect()
    }

    /// Runner of the most recent spawn.
    pub fn last_runner(&self) -> Option<RunnerId> {
        self.lock().spawns.last().map(|s| s.request.runner)
    }

    pub fn restarts(&self) -> Vec<(RunnerId, Duration)> {
        self.lock().restarts.clone()
    }

    /// Whether the fake process with `pid` has been asked to die (explicitly
    /// or by dropping its handle).
    pub fn kill_requested(&self, pid: u32) -> bool {
        let mut state = self.lock();
        if state.killed.contains(&pid) {
            return true;
        }
        let killed = match state.kills.get_mut(&pid) {
            Some(rx) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
            None => false,
        };
        if killed {
            state.kills.remove(&pid);
            state.killed.insert(pid);
        }
        killed
    }

    /// Take the stdin stream of the fake process with `pid`.
    pub fn take_stdin(&self, pid: u32) -> Option<mpsc::Receiver<StdinLine>> {
        self.lock().stdin.remove(&pid)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake backend state poisoned")
    }
}

impl ProcessBackend for FakeBackend {
    fn spawn(&self, request: SpawnRequest) -> io::Result<ProcessHandle> {
        let mut state = self.lock();
        if state.fail_all || state.failing.contains(&request.program) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("fake: no such program {:?}", request.program),
            ));
        }

        state.next_pid += 1;
        let pid = 1000 + state.next_pid;

        let (kill_tx, kill_rx) = oneshot::channel();
        let (stdin_tx, stdin_rx) = mpsc::channel(16);
        state.kills.insert(pid, kill_rx);
        state.stdin.insert(pid, stdin_rx);
        state.spawns.push(SpawnRecord {
            request,
            pid,
            at: Instant::now(),
        });

        Ok(ProcessHandle::new(Some(pid), kill_tx, stdin_tx))
    }

    fn schedule_restart(&self, runner: RunnerId, delay: Duration) -> RestartTimer {
        self.lock().restarts.push((runner, delay));
        RestartTimer::detached()
    }
}
