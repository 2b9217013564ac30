// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod project;
pub mod select;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::{load_project, resolve_log_dir};
use crate::engine::{
    LeafState, Orchestrator, OutputStream, QueueConfig, QueueEvent, RunWarning, RuntimeOptions,
    spawn_runtime,
};
use crate::errors::TreerunError;
use crate::exec::RunnerOptions;
use crate::project::{NodeId, Project};
use crate::select::{RunRequest, log_path, select};

/// What a CLI run ended with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub launched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub nothing_selected: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        !self.nothing_selected && self.failed == 0
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - project loading and log directory resolution
/// - the control loop and its process backend
/// - Ctrl-C handling (first press stops every script, second one exits)
/// - printing of script output and final states
pub async fn run(args: CliArgs) -> Result<RunSummary> {
    let loaded = load_project(&args.project)
        .with_context(|| format!("loading project {:?}", args.project))?;
    let log_dir = resolve_log_dir(args.log_dir.as_deref(), &loaded.settings);
    let project = loaded.project;

    let request = match &args.target {
        Some(path) => RunRequest::Node(
            project
                .find_by_path(path)
                .ok_or_else(|| TreerunError::NodeNotFound(path.clone()))?,
        ),
        None => RunRequest::Project,
    };

    if args.dry_run {
        return Ok(print_dry_run(&project, request, &log_dir));
    }

    let labels: HashMap<NodeId, String> = project
        .leaves()
        .into_iter()
        .map(|leaf| (leaf, project.path_of(leaf)))
        .collect();

    let config = QueueConfig {
        log_dir,
        runner: RunnerOptions {
            stop_cancels_repeats: loaded.settings.stop_cancels_repeats,
        },
    };
    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    let (orchestrator, mut events, task) = spawn_runtime(project, config, options);

    install_ctrl_c(orchestrator.clone());

    match request {
        RunRequest::Node(node) => orchestrator.run_subtree(node).await?,
        RunRequest::Project => orchestrator.run_project().await?,
    }

    let mut summary = RunSummary::default();
    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::OutputChunk { leaf, stream, text } => {
                if args.quiet {
                    continue;
                }
                for line in text.lines() {
                    match stream {
                        OutputStream::Stdout => println!("[{}] {line}", label(&labels, leaf)),
                        OutputStream::Stderr => eprintln!("[{}] {line}", label(&labels, leaf)),
                    }
                }
            }
            QueueEvent::StateChanged { leaf, state } => match state {
                LeafState::Running => summary.launched += 1,
                LeafState::Succeeded => {
                    summary.succeeded += 1;
                    println!("[{}] finished: ok", label(&labels, leaf));
                }
                LeafState::Failed => {
                    summary.failed += 1;
                    println!("[{}] finished: failed", label(&labels, leaf));
                }
            },
            QueueEvent::Warning(warning) => {
                if warning == RunWarning::NothingSelected {
                    summary.nothing_selected = true;
                }
                eprintln!("treerun: {warning}");
            }
            QueueEvent::RunningStarted => info!("run started"),
            QueueEvent::AllFinished => info!("run finished"),
        }
    }

    task.await.context("runtime task failed")?;

    println!(
        "{} launched, {} ok, {} failed",
        summary.launched, summary.succeeded, summary.failed
    );
    Ok(summary)
}

fn label(labels: &HashMap<NodeId, String>, leaf: NodeId) -> &str {
    labels.get(&leaf).map(String::as_str).unwrap_or("?")
}

/// Ctrl-C: the first press stops every script, the second one shuts the
/// loop down.
fn install_ctrl_c(orchestrator: Orchestrator) {
    tokio::spawn(async move {
        let mut presses = 0u32;
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            presses += 1;
            let sent = if presses == 1 {
                info!("Ctrl+C received; stopping all scripts");
                orchestrator.stop_all().await
            } else {
                info!("Ctrl+C received again; shutting down");
                orchestrator.shutdown().await
            };
            if sent.is_err() || presses > 1 {
                return;
            }
        }
    });
}

/// Print the selection for `request` and where each script would log.
fn print_dry_run(project: &Project, request: RunRequest, log_dir: &Path) -> RunSummary {
    let selection = select(project, request);

    println!("treerun dry-run");
    println!("  log_dir = {}", log_dir.display());
    println!();
    println!("scripts ({}):", selection.len());

    for selected in &selection {
        let Some(script) = project.node(selected.leaf).and_then(|n| n.script()) else {
            continue;
        };
        println!("  - {}", project.path_of(selected.leaf));
        println!("      exec: {}", script.executable.display());
        if !script.parameters.is_empty() {
            println!("      args: {:?}", script.arguments());
        }
        if script.repeat_count > 1 {
            println!(
                "      repeat: {} (delay {}s)",
                script.repeat_count, script.delay_seconds
            );
        }
        if !script.environment.is_empty() {
            for pair in script.environment.iter() {
                println!("      env: {}={}", pair.name, pair.value);
            }
        }
        let log = log_path(log_dir, &selected.ancestors, &script.base_name());
        println!("      log: {}", log.display());
    }

    debug!("dry-run complete (no execution)");
    RunSummary {
        nothing_selected: selection.is_empty(),
        ..RunSummary::default()
    }
}
