// src/config/validate.rs

use crate::config::model::{GroupConfig, NodeConfig, ProjectFile, ScriptEntry};
use crate::errors::{Result, TreerunError};
use crate::project::model::check_group_name;

/// Run basic semantic validation against a loaded project file.
///
/// This checks:
/// - group names are non-empty, contain no `/` and are not `.` or `..`
///   (they become directory names and path segments)
/// - every script has a non-empty path and `repeat >= 1`
///
/// It does **not** check that executables exist; see
/// `SettingsSection::skip_missing_scripts`.
pub fn validate_project_file(file: &ProjectFile) -> Result<()> {
    for group in &file.group {
        validate_group(group, "")?;
    }
    Ok(())
}

fn validate_group(group: &GroupConfig, parent_path: &str) -> Result<()> {
    if let Err(TreerunError::ConfigError(msg)) = check_group_name(&group.name) {
        return Err(TreerunError::ConfigError(format!(
            "group under '{parent_path}/': {msg}"
        )));
    }

    let path = format!("{parent_path}/{}", group.name);
    for child in &group.children {
        match child {
            NodeConfig::Group(sub) => validate_group(sub, &path)?,
            NodeConfig::Script(script) => validate_script(script, &path)?,
        }
    }
    Ok(())
}

fn validate_script(script: &ScriptEntry, group_path: &str) -> Result<()> {
    if script.path.as_os_str().is_empty() {
        return Err(TreerunError::ConfigError(format!(
            "script in group '{group_path}' has an empty path"
        )));
    }
    if script.repeat == 0 {
        return Err(TreerunError::ConfigError(format!(
            "script {:?} in group '{group_path}': repeat must be >= 1 (got 0)",
            script.path
        )));
    }
    Ok(())
}
