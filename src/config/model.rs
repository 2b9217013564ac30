// src/config/model.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level project file as read from TOML.
///
/// ```toml
/// [settings]
/// log_dir = "/home/me/treerun"
///
/// [[group]]
/// name = "Nightly"
///
///   [[group.children]]
///   type = "script"
///   path = "/opt/scripts/backup.sh"
///   repeat = 3
///   delay = 5
///   parameters = "--full"
///   env = [{ name = "TARGET", value = "prod" }]
///
///   [[group.children]]
///   type = "group"
///   name = "db"
///   enabled = false
/// ```
///
/// Only groups may appear at the top level.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub settings: SettingsSection,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<GroupConfig>,
}

/// `[settings]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettingsSection {
    /// Base directory for the persistent `.log` files.
    ///
    /// Overridden by `--log-dir` and `TREERUN_LOG_DIR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Drop scripts whose executable no longer exists when loading.
    #[serde(default = "default_true")]
    pub skip_missing_scripts: bool,

    /// When set, stopping a runner also abandons its remaining repeats.
    #[serde(default)]
    pub stop_cancels_repeats: bool,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            log_dir: None,
            skip_missing_scripts: true,
            stop_cancels_repeats: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GroupConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Subgroups and scripts, in display order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeConfig {
    Group(GroupConfig),
    Script(ScriptEntry),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScriptEntry {
    /// Executable path; relative paths are resolved against the project
    /// file's directory.
    pub path: PathBuf,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_repeat", skip_serializing_if = "is_default_repeat")]
    pub repeat: u32,

    /// Seconds between repeats.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delay: u64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameters: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnvEntry {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

fn default_true() -> bool {
    true
}

fn default_repeat() -> u32 {
    1
}

fn is_default_repeat(v: &u32) -> bool {
    *v == 1
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}
