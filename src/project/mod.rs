// src/project/mod.rs

//! The project hierarchy: groups and script leaves.
//!
//! - [`model`] holds the node arena (`Project`, `ProjectNode`, `NodeId`).
//! - [`env`] holds the per-script environment overrides and their editing
//!   rules.

pub mod env;
pub mod model;

pub use env::{EditOutcome, EnvColumn, EnvEntryId, EnvPair, Environment};
pub use model::{NodeId, NodeKind, Project, ProjectNode, RunState, ScriptConfig};
