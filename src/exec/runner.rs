// src/exec/runner.rs

//! Per-leaf script runner.
//!
//! A `ScriptRunner` drives one leaf through a full run: every repeat
//! attempt, the persistent log, the per-run ephemeral buffer and the
//! attached output sinks. It never waits on a process; the control loop
//! feeds it output, exit and restart notifications and it answers with the
//! terminal outcome once there is one.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::engine::{ExitInfo, InputReply, OutputStream, RunOutcome, RunnerId, SinkSlot};
use crate::errors::RunnerError;
use crate::project::ScriptConfig;

use super::backend::{ProcessBackend, ProcessHandle, RestartTimer, SpawnRequest};
use super::sink::OutputSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// When set, an exit that follows `stop()` ends the run instead of
    /// starting the next repeat.
    pub stop_cancels_repeats: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Idle,
    /// Spawn requested, not yet confirmed.
    Starting,
    Running,
    /// Between two attempts, waiting for the repeat delay.
    WaitingRestart,
    Finished(RunOutcome),
}

#[derive(Debug)]
pub struct ScriptRunner {
    id: RunnerId,
    label: String,
    script: ScriptConfig,
    log_path: PathBuf,
    options: RunnerOptions,

    phase: RunnerPhase,
    attempt: u32,
    log: Option<File>,
    ephemeral: Option<NamedTempFile>,
    process: Option<ProcessHandle>,
    restart: Option<RestartTimer>,
    pid: Option<u32>,
    last_exit: Option<ExitInfo>,
    stop_requested: bool,

    console: Option<Box<dyn OutputSink>>,
    monitor: Option<Box<dyn OutputSink>>,
}

impl ScriptRunner {
    /// `script` is a snapshot: later edits to the project don't affect a
    /// runner that already exists.
    pub fn new(
        id: RunnerId,
        label: impl Into<String>,
        script: ScriptConfig,
        log_path: PathBuf,
        options: RunnerOptions,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            script,
            log_path,
            options,
            phase: RunnerPhase::Idle,
            attempt: 0,
            log: None,
            ephemeral: None,
            process: None,
            restart: None,
            pid: None,
            last_exit: None,
            stop_requested: false,
            console: None,
            monitor: None,
        }
    }

    /// Begin the run.
    ///
    /// Returns `Some(outcome)` if the run ended before any process was left
    /// running (log file unusable, spawn refused).
    pub fn start(&mut self, backend: &dyn ProcessBackend) -> Option<RunOutcome> {
        if self.phase != RunnerPhase::Idle {
            warn!(runner = %self.id, label = %self.label, phase = ?self.phase, "start ignored; runner already used");
            return None;
        }

        self.attempt = 1;
        self.stop_requested = false;
        self.last_exit = None;

        match open_log(&self.log_path) {
            Ok(file) => self.log = Some(file),
            Err(err) => {
                error!(runner = %self.id, label = %self.label, error = %err, "cannot open log file");
                return self.finish(RunOutcome::Failure);
            }
        }

        match NamedTempFile::new() {
            Ok(file) => self.ephemeral = Some(file),
            Err(e) => {
                let err = RunnerError::Ephemeral(e);
                warn!(runner = %self.id, label = %self.label, error = %err, "running without ephemeral buffer");
                self.ephemeral = None;
            }
        }

        let repeat = self.script.repeat_count;
        if repeat > 1 {
            self.record(format!("executing #1 of {repeat}\n\n").as_bytes());
        }

        self.launch(backend)
    }

    /// Handle one chunk of process output.
    ///
    /// Returns the text forwarded to the sinks, so the caller can publish it.
    pub fn on_output(&mut self, stream: OutputStream, data: &[u8]) -> Option<String> {
        if self.phase != RunnerPhase::Running {
            debug!(runner = %self.id, ?stream, bytes = data.len(), "output outside a running attempt; dropped");
            return None;
        }

        self.record(data);

        let mut text = String::from_utf8_lossy(data).into_owned();
        if stream == OutputStream::Stderr && text.ends_with('\n') {
            text.pop();
        }

        if let Some(sink) = self.console.as_mut() {
            sink.append(&text);
        }
        if let Some(sink) = self.monitor.as_mut() {
            sink.append(&text);
        }

        Some(text)
    }

    /// Handle the exit of the current attempt: start the next repeat (now or
    /// after the delay) or finish.
    pub fn on_exit(&mut self, exit: ExitInfo, backend: &dyn ProcessBackend) -> Option<RunOutcome> {
        if self.phase != RunnerPhase::Running {
            debug!(runner = %self.id, phase = ?self.phase, "exit notification ignored");
            return None;
        }

        info!(
            runner = %self.id,
            label = %self.label,
            attempt = self.attempt,
            graceful = exit.graceful,
            exit_code = ?exit.code,
            "attempt finished"
        );

        self.process = None;
        self.pid = None;
        self.last_exit = Some(exit);

        if self.attempt < self.script.repeat_count && !self.repeats_cancelled() {
            self.attempt += 1;
            let delay = self.script.delay();
            if delay.is_zero() {
                return self.begin_attempt(backend);
            }
            debug!(runner = %self.id, attempt = self.attempt, ?delay, "waiting before next attempt");
            self.phase = RunnerPhase::WaitingRestart;
            self.restart = Some(backend.schedule_restart(self.id, delay));
            return None;
        }

        self.finish(outcome_of(exit))
    }

    /// Handle an elapsed repeat delay.
    pub fn on_restart_due(&mut self, backend: &dyn ProcessBackend) -> Option<RunOutcome> {
        if self.phase != RunnerPhase::WaitingRestart {
            debug!(runner = %self.id, phase = ?self.phase, "restart notification ignored");
            return None;
        }
        self.restart = None;

        if self.repeats_cancelled() {
            let outcome = self
                .last_exit
                .map(outcome_of)
                .unwrap_or(RunOutcome::Failure);
            return self.finish(outcome);
        }

        self.begin_attempt(backend)
    }

    /// Ask the live process to terminate. The terminal transition still comes
    /// from the exit notification.
    ///
    /// Returns true if a kill was requested.
    pub fn stop(&mut self) -> bool {
        match self.phase {
            RunnerPhase::Running | RunnerPhase::Starting => {
                self.stop_requested = true;
                let killed = self
                    .process
                    .as_mut()
                    .map(ProcessHandle::request_kill)
                    .unwrap_or(false);
                info!(runner = %self.id, label = %self.label, killed, "stop requested");
                killed
            }
            RunnerPhase::WaitingRestart => {
                self.stop_requested = true;
                debug!(runner = %self.id, "stop requested between attempts");
                false
            }
            RunnerPhase::Idle | RunnerPhase::Finished(_) => false,
        }
    }

    /// Write `line` plus a newline to the process's stdin. The result goes to
    /// `reply`; failures never affect the process.
    pub fn send_input(&mut self, line: String, reply: InputReply) {
        match (&self.phase, self.process.as_ref()) {
            (RunnerPhase::Running, Some(process)) => process.submit_line(line, reply),
            _ => {
                let _ = reply.send(Err(RunnerError::NotRunning));
            }
        }
    }

    /// Attach a sink. A console first receives everything the current run has
    /// produced so far.
    pub fn attach_sink(&mut self, slot: SinkSlot, mut sink: Box<dyn OutputSink>) {
        match slot {
            SinkSlot::Console => {
                match self.read_ephemeral() {
                    Ok(previous) if !previous.is_empty() => sink.append(&previous),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(runner = %self.id, error = %e, "cannot replay ephemeral buffer")
                    }
                }
                self.console = Some(sink);
            }
            SinkSlot::Monitor => self.monitor = Some(sink),
        }
    }

    pub fn detach_sink(&mut self, slot: SinkSlot) {
        match slot {
            SinkSlot::Console => self.console = None,
            SinkSlot::Monitor => self.monitor = None,
        }
    }

    /// Tear down without reporting: kill the process, cancel a pending
    /// restart and close the log.
    pub fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.request_kill();
            debug!(runner = %self.id, label = %self.label, "process killed on shutdown");
        }
        if let Some(mut timer) = self.restart.take() {
            timer.cancel();
        }
        self.log = None;
        self.pid = None;
    }

    pub fn id(&self) -> RunnerId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn phase(&self) -> RunnerPhase {
        self.phase
    }

    /// 1-based number of the current (or last) attempt; 0 before `start`.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn repeat_count(&self) -> u32 {
        self.script.repeat_count
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True between `start` and the terminal outcome, including delays.
    pub fn is_running(&self) -> bool {
        !matches!(self.phase, RunnerPhase::Idle | RunnerPhase::Finished(_))
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        match self.phase {
            RunnerPhase::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn last_exit(&self) -> Option<ExitInfo> {
        self.last_exit
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn ephemeral_path(&self) -> Option<&Path> {
        self.ephemeral.as_ref().map(NamedTempFile::path)
    }

    /// Everything the current run has written so far.
    pub fn read_ephemeral(&self) -> std::io::Result<String> {
        let Some(path) = self.ephemeral_path() else {
            return Ok(String::new());
        };
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn repeats_cancelled(&self) -> bool {
        self.options.stop_cancels_repeats && self.stop_requested
    }

    fn begin_attempt(&mut self, backend: &dyn ProcessBackend) -> Option<RunOutcome> {
        let repeat = self.script.repeat_count;
        self.record(format!("\n\nexecuting #{} of {repeat}\n\n", self.attempt).as_bytes());
        self.launch(backend)
    }

    fn launch(&mut self, backend: &dyn ProcessBackend) -> Option<RunOutcome> {
        self.phase = RunnerPhase::Starting;

        let request = SpawnRequest {
            runner: self.id,
            program: self.script.executable.clone(),
            args: self.script.arguments(),
            env: self.script.environment.to_vars(),
        };

        match backend.spawn(request) {
            Ok(process) => {
                self.pid = process.pid();
                self.process = Some(process);
                self.phase = RunnerPhase::Running;
                info!(
                    runner = %self.id,
                    label = %self.label,
                    attempt = self.attempt,
                    repeat = self.script.repeat_count,
                    pid = ?self.pid,
                    "script started"
                );
                None
            }
            Err(source) => {
                self.record(format!("failed to start: {source}\n").as_bytes());
                let err = RunnerError::Spawn {
                    program: self.script.executable.clone(),
                    source,
                };
                error!(runner = %self.id, label = %self.label, attempt = self.attempt, error = %err, "spawn failed");
                self.finish(RunOutcome::Failure)
            }
        }
    }

    fn finish(&mut self, outcome: RunOutcome) -> Option<RunOutcome> {
        self.phase = RunnerPhase::Finished(outcome);
        self.process = None;
        self.restart = None;
        self.pid = None;
        if let Some(mut log) = self.log.take() {
            if let Err(e) = log.flush() {
                warn!(runner = %self.id, error = %e, "flushing log file failed");
            }
        }
        info!(runner = %self.id, label = %self.label, ?outcome, attempts = self.attempt, "script finished");
        Some(outcome)
    }

    /// Append raw bytes to the persistent log and the ephemeral buffer.
    fn record(&mut self, data: &[u8]) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.write_all(data).and_then(|_| log.flush()) {
                warn!(runner = %self.id, path = ?self.log_path, error = %e, "writing log file failed");
            }
        }
        if let Some(buffer) = self.ephemeral.as_mut() {
            let file = buffer.as_file_mut();
            if let Err(e) = file.write_all(data).and_then(|_| file.flush()) {
                warn!(runner = %self.id, error = %e, "writing ephemeral buffer failed");
            }
        }
    }
}

fn outcome_of(exit: ExitInfo) -> RunOutcome {
    if exit.graceful {
        RunOutcome::Success
    } else {
        RunOutcome::Failure
    }
}

fn open_log(path: &Path) -> Result<File, RunnerError> {
    let to_err = |source: std::io::Error| RunnerError::LogOpen {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(to_err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_err)
}

