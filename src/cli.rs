// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `treerun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "treerun",
    version,
    about = "Run a tree of scripts, with per-script repeats, delays and logs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project file (TOML).
    ///
    /// Default: `Treerun.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Treerun.toml")]
    pub project: PathBuf,

    /// Run only this group or script, addressed by its path of display
    /// names, e.g. `Nightly/backup.sh`.
    ///
    /// Without it, every enabled top-level group runs.
    #[arg(long, value_name = "PATH")]
    pub target: Option<String>,

    /// Base directory for the per-script `.log` files.
    ///
    /// Overrides `TREERUN_LOG_DIR` and `[settings].log_dir`.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TREERUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load the project, print what would run and where it would log, but
    /// don't start anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Don't echo script output; only report final states.
    #[arg(long)]
    pub quiet: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
