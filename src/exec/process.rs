// src/exec/process.rs

//! OS process plumbing for a single attempt: spawn, output pumps, stdin
//! writer and the supervisor that reports the exit.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{ExitInfo, OutputStream, ProcessEvent, RunnerId, RuntimeEvent};
use crate::errors::RunnerError;

use super::backend::{ProcessHandle, SpawnRequest, StdinLine};

const READ_CHUNK: usize = 8 * 1024;

/// How long the supervisor waits for the output pumps after the child has
/// exited. Pipes inherited by background grandchildren can stay open forever.
const PUMP_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Spawn one attempt and wire its I/O back to the control loop.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_process(
    request: SpawnRequest,
    events: mpsc::WeakSender<RuntimeEvent>,
) -> std::io::Result<ProcessHandle> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // A non-empty override list is the child's whole environment; only an
    // empty one inherits ours.
    if !request.env.is_empty() {
        cmd.env_clear();
    }
    for (name, value) in &request.env {
        cmd.env(name, value);
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let runner = request.runner;

    info!(%runner, program = ?request.program, args = ?request.args, ?pid, "process started");

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump_output(
            stdout,
            OutputStream::Stdout,
            runner,
            events.clone(),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump_output(
            stderr,
            OutputStream::Stderr,
            runner,
            events.clone(),
        )));
    }

    let (stdin_tx, stdin_rx) = mpsc::channel::<StdinLine>(16);
    tokio::spawn(write_stdin(child.stdin.take(), stdin_rx));

    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    tokio::spawn(supervise(child, kill_rx, pumps, runner, events));

    Ok(ProcessHandle::new(pid, kill_tx, stdin_tx))
}

/// Forward raw chunks of one output stream until EOF.
async fn pump_output<R>(
    mut reader: R,
    stream: OutputStream,
    runner: RunnerId,
    events: mpsc::WeakSender<RuntimeEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = RuntimeEvent::Process(ProcessEvent::Output {
                    runner,
                    stream,
                    data: buf[..n].to_vec(),
                });
                let sent = match events.upgrade() {
                    Some(events) => events.send(event).await.is_ok(),
                    None => false,
                };
                if !sent {
                    debug!(%runner, ?stream, "control loop gone; dropping output");
                    break;
                }
            }
            Err(e) => {
                warn!(%runner, ?stream, error = %e, "reading process output failed");
                break;
            }
        }
    }
}

/// Serve stdin write requests until the handle is dropped.
async fn write_stdin(mut stdin: Option<ChildStdin>, mut rx: mpsc::Receiver<StdinLine>) {
    while let Some(line) = rx.recv().await {
        let result = match stdin.as_mut() {
            Some(pipe) => write_line(pipe, &line.text)
                .await
                .map_err(RunnerError::Stdin),
            None => Err(RunnerError::StdinClosed),
        };
        if result.is_err() {
            stdin = None;
        }
        let _ = line.reply.send(result);
    }
}

async fn write_line(pipe: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    pipe.write_all(text.as_bytes()).await?;
    pipe.write_all(b"\n").await?;
    pipe.flush().await
}

/// Wait for the child (or a kill request), let the pumps drain, then report
/// the exit.
///
/// A dropped kill sender counts as a kill request: the handle is gone, so
/// nobody owns this process any more.
async fn supervise(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    pumps: Vec<JoinHandle<()>>,
    runner: RunnerId,
    events: mpsc::WeakSender<RuntimeEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            info!(%runner, "kill requested; terminating process");
            if let Err(e) = child.start_kill() {
                warn!(%runner, error = %e, "failed to kill process");
            }
            child.wait().await
        }
    };

    for pump in pumps {
        let abort = pump.abort_handle();
        if tokio::time::timeout(PUMP_DRAIN_GRACE, pump).await.is_err() {
            warn!(%runner, "output still open after exit; detaching reader");
            abort.abort();
        }
    }

    let exit = match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => {
            warn!(%runner, error = %e, "waiting for process failed");
            ExitInfo::abnormal()
        }
    };

    info!(%runner, graceful = exit.graceful, exit_code = ?exit.code, "process exited");

    if let Some(events) = events.upgrade() {
        let _ = events
            .send(RuntimeEvent::Process(ProcessEvent::Exited { runner, exit }))
            .await;
    }
}
