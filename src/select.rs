// src/select.rs

//! Selection of the script leaves a run request should launch.
//!
//! Two rules apply:
//! - a leaf targeted directly runs iff its own `enabled` flag is set,
//!   whatever its enclosing groups say;
//! - a subtree (or the whole project) walk only descends into enabled child
//!   groups, so a disabled group prunes everything below it.
//!
//! Executable existence is not checked here; that surfaces at spawn time.

use std::path::{Path, PathBuf};

use crate::project::{NodeId, Project};

/// What the user asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    /// A node from the tree: a group runs its subtree, a script runs alone.
    Node(NodeId),
    /// Every enabled top-level group.
    Project,
}

/// One leaf to launch plus the enclosing group names (outermost first)
/// captured at selection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedScript {
    pub leaf: NodeId,
    pub ancestors: Vec<String>,
}

pub fn select(project: &Project, request: RunRequest) -> Vec<SelectedScript> {
    match request {
        RunRequest::Project => select_project(project),
        RunRequest::Node(id) => match project.node(id) {
            Some(node) if node.is_script() => select_single(project, id),
            Some(_) => select_subtree(project, id),
            None => Vec::new(),
        },
    }
}

/// Single-leaf rule: only the leaf's own flag counts.
pub fn select_single(project: &Project, leaf: NodeId) -> Vec<SelectedScript> {
    match project.node(leaf) {
        Some(node) if node.is_script() && node.enabled() => vec![SelectedScript {
            leaf,
            ancestors: project.ancestor_names(leaf),
        }],
        _ => Vec::new(),
    }
}

/// Subtree rule starting at `group`. The group's own flag is not consulted;
/// its descendants' flags are.
pub fn select_subtree(project: &Project, group: NodeId) -> Vec<SelectedScript> {
    let Some(node) = project.node(group) else {
        return Vec::new();
    };
    if !node.is_group() {
        return select_single(project, group);
    }

    let mut path = project.ancestor_names(group);
    path.push(node.name().to_string());

    let mut out = Vec::new();
    walk_group(project, group, &mut path, &mut out);
    out
}

/// Whole-project run: every enabled top-level group, in order.
pub fn select_project(project: &Project) -> Vec<SelectedScript> {
    let mut out = Vec::new();
    for &root in project.roots() {
        let Some(node) = project.node(root) else { continue };
        if !node.enabled() {
            continue;
        }
        let mut path = vec![node.name().to_string()];
        walk_group(project, root, &mut path, &mut out);
    }
    out
}

fn walk_group(
    project: &Project,
    group: NodeId,
    path: &mut Vec<String>,
    out: &mut Vec<SelectedScript>,
) {
    for &child in project.children(group) {
        let Some(node) = project.node(child) else { continue };
        if !node.enabled() {
            continue;
        }

        if node.is_group() {
            path.push(node.name().to_string());
            walk_group(project, child, path, out);
            path.pop();
        } else {
            out.push(SelectedScript {
                leaf: child,
                ancestors: path.clone(),
            });
        }
    }
}

/// `<base>/<group>/.../<script base name>.log`
pub fn log_path(base_dir: &Path, ancestors: &[String], base_name: &str) -> PathBuf {
    let mut path = base_dir.to_path_buf();
    for group in ancestors {
        path.push(group);
    }
    path.push(format!("{base_name}.log"));
    path
}

/// Log file location of a leaf, e.g. for a "show log" action.
pub fn log_path_for(project: &Project, base_dir: &Path, leaf: NodeId) -> Option<PathBuf> {
    let script = project.node(leaf)?.script()?;
    Some(log_path(
        base_dir,
        &project.ancestor_names(leaf),
        &script.base_name(),
    ))
}
