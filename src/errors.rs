// src/errors.rs

//! Crate-wide error types.
//!
//! - [`TreerunError`] covers project loading, configuration and the control
//!   loop itself.
//! - [`RunnerError`] covers a single script runner: log files, spawning and
//!   stdin. These never take the queue down; they surface as a failed leaf.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreerunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML writing error: {0}")]
    TomlWriteError(#[from] toml::ser::Error),

    #[error("Runner error: {0}")]
    RunnerError(#[from] RunnerError),

    #[error("runtime has shut down")]
    RuntimeClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures local to one script runner.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("cannot open log file {path:?}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create ephemeral output buffer: {0}")]
    Ephemeral(#[source] std::io::Error),

    #[error("failed to start {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script is not running")]
    NotRunning,

    #[error("script input stream is closed")]
    StdinClosed,

    #[error("writing to script input failed: {0}")]
    Stdin(#[source] std::io::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TreerunError>;
