// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::model::{
    EnvEntry, GroupConfig, NodeConfig, ProjectFile, ScriptEntry, SettingsSection,
};
use crate::config::validate::validate_project_file;
use crate::errors::Result;
use crate::project::{NodeId, NodeKind, Project, ScriptConfig};

/// Environment variable overriding the base log directory.
pub const LOG_DIR_ENV: &str = "TREERUN_LOG_DIR";

/// A project materialised from disk together with its settings.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub project: Project,
    pub settings: SettingsSection,
}

/// Load a project file from a given path and return the raw `ProjectFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_project`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ProjectFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let file: ProjectFile = toml::from_str(&contents)?;

    Ok(file)
}

/// Load, validate and materialise a project file.
///
/// Relative script paths are resolved against the directory holding the
/// project file.
pub fn load_project(path: impl AsRef<Path>) -> Result<LoadedProject> {
    let path = path.as_ref();
    let file = load_from_path(path)?;
    validate_project_file(&file)?;

    let base_dir = project_root_dir(path);
    let project = build_project(&file, &base_dir);
    debug!(path = ?path, nodes = project.len(), "project loaded");

    Ok(LoadedProject {
        project,
        settings: file.settings,
    })
}

/// Turn a validated `ProjectFile` into the in-memory tree.
pub fn build_project(file: &ProjectFile, base_dir: &Path) -> Project {
    let mut project = Project::new();
    for group in &file.group {
        match project.add_group(group.name.clone(), group.enabled) {
            Ok(id) => add_children(&mut project, id, group, base_dir, &file.settings),
            Err(e) => warn!(group = %group.name, error = %e, "skipping group"),
        }
    }
    project
}

fn add_children(
    project: &mut Project,
    parent: NodeId,
    group: &GroupConfig,
    base_dir: &Path,
    settings: &SettingsSection,
) {
    for child in &group.children {
        match child {
            NodeConfig::Group(sub) => {
                match project.add_subgroup(parent, sub.name.clone(), sub.enabled) {
                    Ok(id) => add_children(project, id, sub, base_dir, settings),
                    Err(e) => warn!(group = %sub.name, error = %e, "skipping group"),
                }
            }
            NodeConfig::Script(entry) => {
                let executable = resolve_script_path(base_dir, &entry.path);
                if settings.skip_missing_scripts && !executable.exists() {
                    warn!(path = ?executable, group = %group.name, "script no longer exists; skipping");
                    continue;
                }

                let mut script = ScriptConfig::new(executable)
                    .with_repeat(entry.repeat)
                    .with_delay(entry.delay)
                    .with_parameters(entry.parameters.clone());
                for env in &entry.env {
                    script
                        .environment
                        .insert_unchecked(env.name.clone(), env.value.clone());
                }

                let _ = project.add_script(parent, script, entry.enabled);
            }
        }
    }
}

/// Convert the in-memory tree back into its file representation.
pub fn to_project_file(project: &Project, settings: &SettingsSection) -> ProjectFile {
    let group = project
        .roots()
        .iter()
        .filter_map(|&id| group_config(project, id))
        .collect();

    ProjectFile {
        settings: settings.clone(),
        group,
    }
}

fn group_config(project: &Project, id: NodeId) -> Option<GroupConfig> {
    let node = project.node(id)?;
    let children = node
        .children()
        .iter()
        .filter_map(|&child| {
            let child_node = project.node(child)?;
            match child_node.kind() {
                NodeKind::Group { .. } => group_config(project, child).map(NodeConfig::Group),
                NodeKind::Script(script) => Some(NodeConfig::Script(ScriptEntry {
                    path: script.executable.clone(),
                    enabled: child_node.enabled(),
                    repeat: script.repeat_count,
                    delay: script.delay_seconds,
                    parameters: script.parameters.clone(),
                    env: script
                        .environment
                        .iter()
                        .map(|p| EnvEntry {
                            name: p.name.clone(),
                            value: p.value.clone(),
                        })
                        .collect(),
                })),
            }
        })
        .collect();

    Some(GroupConfig {
        name: node.name().to_string(),
        enabled: node.enabled(),
        children,
    })
}

/// Write the project to `path` in TOML form.
pub fn save_project(
    path: impl AsRef<Path>,
    project: &Project,
    settings: &SettingsSection,
) -> Result<()> {
    let file = to_project_file(project, settings);
    let contents = toml::to_string(&file)?;
    fs::write(path.as_ref(), contents)?;
    Ok(())
}

/// Pick the base log directory.
///
/// Priority:
/// 1. `--log-dir` CLI flag
/// 2. `TREERUN_LOG_DIR` environment variable
/// 3. `[settings].log_dir`
/// 4. `$HOME/treerun`
/// 5. `./treerun-logs`
pub fn resolve_log_dir(cli: Option<&Path>, settings: &SettingsSection) -> PathBuf {
    resolve_log_dir_from(
        cli,
        std::env::var_os(LOG_DIR_ENV).map(PathBuf::from),
        settings,
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

pub fn resolve_log_dir_from(
    cli: Option<&Path>,
    env: Option<PathBuf>,
    settings: &SettingsSection,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(dir) = cli {
        return dir.to_path_buf();
    }
    if let Some(dir) = env.filter(|d| !d.as_os_str().is_empty()) {
        return dir;
    }
    if let Some(dir) = &settings.log_dir {
        return dir.clone();
    }
    match home {
        Some(home) if !home.as_os_str().is_empty() => home.join("treerun"),
        _ => PathBuf::from("treerun-logs"),
    }
}

/// Directory against which relative script paths are resolved.
///
/// A bare file name (parent = "") falls back to the current directory.
fn project_root_dir(project_path: &Path) -> PathBuf {
    match project_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn resolve_script_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
