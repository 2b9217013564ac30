// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the scripts of a queue,
//! using `tokio::process::Command`, and reporting back to the control loop
//! via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ProcessBackend` trait and a concrete
//!   `RealProcessBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.
//! - [`process`] owns the per-process tasks: output pumps, stdin writer and
//!   exit supervisor.
//! - [`runner`] holds the `ScriptRunner` state machine (repeats, delays,
//!   log files, sinks).
//! - [`sink`] defines the attachable output consumers.

pub mod backend;
pub mod process;
pub mod runner;
pub mod sink;

pub use backend::{
    ProcessBackend, ProcessHandle, RealProcessBackend, RestartTimer, SpawnRequest, StdinLine,
};
pub use runner::{RunnerOptions, RunnerPhase, ScriptRunner};
pub use sink::{ChannelSink, OutputSink};
