// tests/runner_real_process.rs
//
// End-to-end runs against real `/bin/sh` scripts.

#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use treerun::engine::{
    LeafState, Orchestrator, OutputStream, QueueConfig, QueueEvent, RuntimeOptions, SinkSlot,
    spawn_runtime,
};
use treerun::exec::ChannelSink;
use treerun::project::{NodeId, Project};
use treerun_test_utils::builders::{ProjectBuilder, ScriptConfigBuilder};
use treerun_test_utils::scripts::write_script;
use treerun_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Receive events until the cycle's `AllFinished`, stamping each with its
/// arrival time.
async fn until_finished(
    events: &mut mpsc::UnboundedReceiver<QueueEvent>,
) -> Vec<(Instant, QueueEvent)> {
    let mut out = Vec::new();
    while let Some(event) = events.recv().await {
        let done = event == QueueEvent::AllFinished;
        out.push((Instant::now(), event));
        if done {
            break;
        }
    }
    out
}

fn start(
    project: Project,
    log_dir: &Path,
) -> (
    Orchestrator,
    mpsc::UnboundedReceiver<QueueEvent>,
    JoinHandle<Project>,
) {
    init_tracing();
    spawn_runtime(project, QueueConfig::new(log_dir), RuntimeOptions::default())
}

fn stdout_text(events: &[(Instant, QueueEvent)]) -> String {
    events
        .iter()
        .filter_map(|(_, e)| match e {
            QueueEvent::OutputChunk {
                stream: OutputStream::Stdout,
                text,
                ..
            } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn stdout_of(events: &[(Instant, QueueEvent)], leaf: NodeId) -> String {
    events
        .iter()
        .filter_map(|(_, e)| match e {
            QueueEvent::OutputChunk {
                leaf: l,
                stream: OutputStream::Stdout,
                text,
            } if *l == leaf => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// A variable set in this process that `/bin/sh` does not define by itself.
fn inherited_var() -> Option<String> {
    const SHELL_SET: &[&str] = &[
        "PATH", "PWD", "OLDPWD", "SHLVL", "IFS", "PS1", "PS2", "PS4", "OPTIND", "PPID", "_",
        "LINENO", "ENV", "HOSTNAME", "TERM",
    ];
    let valid = |name: &str| {
        name.chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !SHELL_SET.contains(&name)
    };
    let names: Vec<String> = std::env::vars_os()
        .filter_map(|(k, v)| (!v.is_empty()).then(|| k.into_string().ok()).flatten())
        .filter(|k| valid(k))
        .collect();
    names
        .iter()
        .find(|k| k.starts_with("CARGO_"))
        .or_else(|| names.first())
        .cloned()
}

fn terminal_states(events: &[(Instant, QueueEvent)]) -> Vec<LeafState> {
    events
        .iter()
        .filter_map(|(_, e)| match e {
            QueueEvent::StateChanged { state, .. } if *state != LeafState::Running => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn repeats_with_delay_are_spaced_and_finish_once() -> TestResult {
    let dir = tempdir()?;
    let script = write_script(dir.path(), "tick.sh", "echo tick");
    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new(&script).repeat(3).delay(1), true)
        .build();
    let logs = dir.path().join("logs");
    let (orch, mut events, task) = start(project, &logs);

    orch.run_project().await?;
    let seen = with_timeout(until_finished(&mut events)).await;

    let ticks: Vec<Instant> = seen
        .iter()
        .filter(|(_, e)| matches!(e, QueueEvent::OutputChunk { .. }))
        .map(|(at, _)| *at)
        .collect();
    assert_eq!(ticks.len(), 3, "one output chunk per attempt: {seen:?}");
    for pair in ticks.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
    }
    assert_eq!(terminal_states(&seen), vec![LeafState::Succeeded]);

    let log = fs::read_to_string(logs.join("G").join("tick.sh.log"))?;
    assert_eq!(
        log,
        "executing #1 of 3\n\ntick\n\n\nexecuting #2 of 3\n\ntick\n\n\nexecuting #3 of 3\n\ntick\n"
    );

    orch.shutdown().await?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn persistent_log_accumulates_while_ephemeral_holds_the_last_run() -> TestResult {
    let dir = tempdir()?;
    let counter = dir.path().join("counter");
    let body = format!(
        "n=$(cat '{c}' 2>/dev/null || echo 0)\nn=$((n + 1))\necho $n > '{c}'\necho \"run $n\"",
        c = counter.display()
    );
    let script = write_script(dir.path(), "count.sh", &body);
    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new(&script), true)
        .build();
    let leaf = project.find_by_path("G/count.sh").ok_or("leaf missing")?;
    let logs = dir.path().join("logs");
    let (orch, mut events, task) = start(project, &logs);

    orch.run_project().await?;
    with_timeout(until_finished(&mut events)).await;
    orch.run_project().await?;
    with_timeout(until_finished(&mut events)).await;

    let log = fs::read_to_string(logs.join("G").join("count.sh.log"))?;
    assert_eq!(log, "run 1\nrun 2\n");

    let (console, mut replay) = ChannelSink::new();
    orch.attach_sink(leaf, SinkSlot::Console, console).await?;
    let text = with_timeout(replay.recv()).await.ok_or("no replay")?;
    assert_eq!(text, "run 2\n");

    orch.shutdown().await?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn arguments_environment_and_stderr_reach_the_sinks() -> TestResult {
    let dir = tempdir()?;
    let script = write_script(
        dir.path(),
        "greet.sh",
        "echo \"$GREETING $1 $2\"\necho \"$DUP\"\necho oops >&2",
    );
    let project = ProjectBuilder::new()
        .group("G", true)
        .script(
            "G",
            ScriptConfigBuilder::new(&script)
                .parameters("big   world")
                .env("GREETING", "hello")
                .env("DUP", "first")
                .env("DUP", "second"),
            true,
        )
        .build();
    let logs = dir.path().join("logs");
    let (orch, mut events, task) = start(project, &logs);

    orch.run_project().await?;
    let seen = with_timeout(until_finished(&mut events)).await;

    assert_eq!(stdout_text(&seen), "hello big world\nsecond\n");
    let stderr: Vec<&str> = seen
        .iter()
        .filter_map(|(_, e)| match e {
            QueueEvent::OutputChunk {
                stream: OutputStream::Stderr,
                text,
                ..
            } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stderr, vec!["oops"]);

    let log = fs::read_to_string(logs.join("G").join("greet.sh.log"))?;
    assert!(log.contains("oops\n"), "files keep the untrimmed text");

    orch.shutdown().await?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_is_success_and_unspawnable_file_is_failure() -> TestResult {
    let dir = tempdir()?;
    let fails = write_script(dir.path(), "exit3.sh", "exit 3");
    let not_exec = dir.path().join("plain.sh");
    fs::write(&not_exec, "#!/bin/sh\necho never\n")?;

    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new(&fails), true)
        .script("G", ScriptConfigBuilder::new(&not_exec), true)
        .build();
    let code = project.find_by_path("G/exit3.sh").ok_or("exit3 missing")?;
    let plain = project.find_by_path("G/plain.sh").ok_or("plain missing")?;
    let logs = dir.path().join("logs");
    let (orch, mut events, task) = start(project, &logs);

    orch.run_project().await?;
    let seen = with_timeout(until_finished(&mut events)).await;

    assert!(seen.iter().any(|(_, e)| *e
        == QueueEvent::StateChanged {
            leaf: code,
            state: LeafState::Succeeded
        }));
    assert!(seen.iter().any(|(_, e)| *e
        == QueueEvent::StateChanged {
            leaf: plain,
            state: LeafState::Failed
        }));

    let log = fs::read_to_string(logs.join("G").join("plain.sh.log"))?;
    assert!(log.starts_with("failed to start: "));

    orch.shutdown().await?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn stdin_lines_are_delivered() -> TestResult {
    let dir = tempdir()?;
    let script = write_script(dir.path(), "ask.sh", "read answer\necho \"got $answer\"");
    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new(&script), true)
        .build();
    let leaf = project.find_by_path("G/ask.sh").ok_or("leaf missing")?;
    let logs = dir.path().join("logs");
    let (orch, mut events, task) = start(project, &logs);

    orch.run_project().await?;
    orch.send_input(leaf, "yes").await?;
    let seen = with_timeout(until_finished(&mut events)).await;

    assert_eq!(stdout_text(&seen), "got yes\n");
    assert!(orch.send_input(leaf, "late").await.is_err());

    orch.shutdown().await?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn stop_kills_a_long_running_script() -> TestResult {
    let dir = tempdir()?;
    let script = write_script(dir.path(), "sleepy.sh", "exec sleep 30");
    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new(&script), true)
        .build();
    let leaf = project.find_by_path("G/sleepy.sh").ok_or("leaf missing")?;
    let logs = dir.path().join("logs");
    let (orch, mut events, task) = start(project, &logs);

    orch.run_project().await?;
    assert!(orch.is_running().await?);
    orch.stop(leaf).await?;
    let seen = with_timeout(until_finished(&mut events)).await;

    assert_eq!(terminal_states(&seen), vec![LeafState::Failed]);
    assert!(!orch.is_running().await?);

    orch.shutdown().await?;
    let project = task.await?;
    assert_eq!(
        project.node(leaf).map(|n| n.run_state()),
        Some(treerun::project::RunState::Completed)
    );
    Ok(())
}

#[tokio::test]
async fn overrides_replace_the_inherited_environment() -> TestResult {
    let dir = tempdir()?;
    let name = inherited_var().ok_or("no inherited variable to check")?;
    let body = format!("echo \"inherited=[${{{name}+set}}] own=[$OWN]\"");
    let with_env = write_script(dir.path(), "with_env.sh", &body);
    let plain = write_script(dir.path(), "plain.sh", &body);
    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new(&with_env).env("OWN", "x"), true)
        .script("G", ScriptConfigBuilder::new(&plain), true)
        .build();
    let overridden = project.find_by_path("G/with_env.sh").ok_or("with_env missing")?;
    let inheriting = project.find_by_path("G/plain.sh").ok_or("plain missing")?;
    let logs = dir.path().join("logs");
    let (orch, mut events, task) = start(project, &logs);

    orch.run_project().await?;
    let seen = with_timeout(until_finished(&mut events)).await;

    assert_eq!(stdout_of(&seen, overridden), "inherited=[] own=[x]\n", "{name}");
    assert_eq!(stdout_of(&seen, inheriting), "inherited=[set] own=[]\n", "{name}");

    orch.shutdown().await?;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn dropping_every_handle_ends_the_loop_and_kills_scripts() -> TestResult {
    let dir = tempdir()?;
    let pid_file = dir.path().join("pid");
    let body = format!("echo $$ > '{}'\nexec sleep 30", pid_file.display());
    let script = write_script(dir.path(), "sleepy.sh", &body);
    let project = ProjectBuilder::new()
        .group("G", true)
        .script("G", ScriptConfigBuilder::new(&script), true)
        .build();
    let leaf = project.find_by_path("G/sleepy.sh").ok_or("leaf missing")?;
    let logs = dir.path().join("logs");
    let (orch, events, task) = start(project, &logs);

    orch.run_project().await?;
    assert!(orch.is_running().await?);
    let pid = with_timeout(async {
        loop {
            if let Ok(text) = fs::read_to_string(&pid_file) {
                if let Ok(pid) = text.trim().parse::<u32>() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    drop(orch);
    drop(events);
    let project = tokio::time::timeout(Duration::from_secs(3), task).await??;
    assert_eq!(
        project.node(leaf).map(|n| n.run_state()),
        Some(treerun::project::RunState::Running)
    );

    let gone = with_timeout(async {
        loop {
            let alive = tokio::process::Command::new("/bin/sh")
                .arg("-c")
                .arg(format!("kill -0 {pid} 2>/dev/null"))
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if !alive {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(gone);
    Ok(())
}
