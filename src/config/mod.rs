// src/config/mod.rs

//! Project file loading, saving and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load / save a project file and resolve settings (`loader.rs`).
//! - Validate basic invariants like group naming and repeat counts
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    LoadedProject, build_project, load_from_path, load_project, resolve_log_dir, save_project,
    to_project_file,
};
pub use model::{EnvEntry, GroupConfig, NodeConfig, ProjectFile, ScriptEntry, SettingsSection};
pub use validate::validate_project_file;
