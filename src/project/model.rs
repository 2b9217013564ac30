// src/project/model.rs

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{Result, TreerunError};
use crate::project::env::Environment;

/// Arena index of a node inside a [`Project`].
///
/// Ids stay valid until the node is removed; removed slots are never reused
/// while the project lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Group names become directories under the log base and segments of
/// slash paths, so they must be a single, non-relative path component.
pub fn check_group_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TreerunError::ConfigError(
            "group name must not be empty".to_string(),
        ));
    }
    if name.contains('/') {
        return Err(TreerunError::ConfigError(format!(
            "group name '{name}' must not contain '/'"
        )));
    }
    if name == "." || name == ".." {
        return Err(TreerunError::ConfigError(format!(
            "group name '{name}' is not allowed"
        )));
    }
    Ok(())
}

/// Execution history of a script leaf, as shown by the project tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    NeverRun,
    Running,
    Completed,
}

/// Everything needed to launch one script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptConfig {
    /// Absolute path of the executable.
    pub executable: PathBuf,
    /// How many times the script runs per launch (>= 1).
    pub repeat_count: u32,
    /// Pause between repeats, in seconds.
    pub delay_seconds: u64,
    /// Raw command line, split on whitespace at launch.
    pub parameters: String,
    pub environment: Environment,
}

impl ScriptConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            repeat_count: 1,
            delay_seconds: 0,
            parameters: String::new(),
            environment: Environment::new(),
        }
    }

    pub fn with_repeat(mut self, repeat_count: u32) -> Self {
        self.repeat_count = repeat_count.max(1);
        self
    }

    pub fn with_delay(mut self, delay_seconds: u64) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert_unchecked(name, value);
        self
    }

    /// Argument list handed to the process. No quote handling.
    pub fn arguments(&self) -> Vec<String> {
        self.parameters
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    /// File name of the executable; used as the leaf's display name and as
    /// the stem of its log file.
    pub fn base_name(&self) -> String {
        self.executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Group { children: Vec<NodeId> },
    Script(ScriptConfig),
}

/// One entry of the project hierarchy.
#[derive(Debug, Clone)]
pub struct ProjectNode {
    name: String,
    enabled: bool,
    /// Back-reference used for path reconstruction only.
    parent: Option<NodeId>,
    kind: NodeKind,
    run_state: RunState,
}

impl ProjectNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group { .. })
    }

    pub fn is_script(&self) -> bool {
        matches!(self.kind, NodeKind::Script(_))
    }

    /// Children of a group; always empty for a script.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Group { children } => children,
            NodeKind::Script(_) => &[],
        }
    }

    pub fn script(&self) -> Option<&ScriptConfig> {
        match &self.kind {
            NodeKind::Script(cfg) => Some(cfg),
            NodeKind::Group { .. } => None,
        }
    }

    pub fn script_mut(&mut self) -> Option<&mut ScriptConfig> {
        match &mut self.kind {
            NodeKind::Script(cfg) => Some(cfg),
            NodeKind::Group { .. } => None,
        }
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }
}

/// The project forest: top-level groups, each owning its subtree.
#[derive(Debug, Clone, Default)]
pub struct Project {
    nodes: Vec<Option<ProjectNode>>,
    roots: Vec<NodeId>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&ProjectNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ProjectNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(ProjectNode::children).unwrap_or(&[])
    }

    /// Add a top-level group.
    pub fn add_group(&mut self, name: impl Into<String>, enabled: bool) -> Result<NodeId> {
        let name = name.into();
        check_group_name(&name)?;
        let id = self.push(ProjectNode {
            name,
            enabled,
            parent: None,
            kind: NodeKind::Group {
                children: Vec::new(),
            },
            run_state: RunState::NeverRun,
        });
        self.roots.push(id);
        Ok(id)
    }

    pub fn add_subgroup(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        enabled: bool,
    ) -> Result<NodeId> {
        let name = name.into();
        check_group_name(&name)?;
        self.ensure_group(parent)?;
        let id = self.push(ProjectNode {
            name,
            enabled,
            parent: Some(parent),
            kind: NodeKind::Group {
                children: Vec::new(),
            },
            run_state: RunState::NeverRun,
        });
        self.attach(parent, id);
        Ok(id)
    }

    pub fn add_script(
        &mut self,
        parent: NodeId,
        script: ScriptConfig,
        enabled: bool,
    ) -> Result<NodeId> {
        self.ensure_group(parent)?;
        let id = self.push(ProjectNode {
            name: script.base_name(),
            enabled,
            parent: Some(parent),
            kind: NodeKind::Script(script),
            run_state: RunState::NeverRun,
        });
        self.attach(parent, id);
        Ok(id)
    }

    /// Rename a group. Script names always follow their executable.
    pub fn rename_group(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        check_group_name(&name)?;
        let node = self
            .node_mut(id)
            .ok_or_else(|| TreerunError::NodeNotFound(id.to_string()))?;
        if !node.is_group() {
            return Err(TreerunError::ConfigError(format!(
                "node {id} is a script; its name follows the executable path"
            )));
        }
        node.name = name;
        Ok(())
    }

    /// Remove a node and its whole subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let parent = self
            .node(id)
            .ok_or_else(|| TreerunError::NodeNotFound(id.to_string()))?
            .parent;

        match parent {
            Some(p) => {
                if let Some(NodeKind::Group { children }) =
                    self.node_mut(p).map(|n| &mut n.kind)
                {
                    children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                stack.extend(node.children().iter().copied());
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    /// Display names of the enclosing groups, outermost first.
    pub fn ancestor_names(&self, id: NodeId) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = self.node(id).and_then(|n| n.parent);
        while let Some(pid) = current {
            match self.node(pid) {
                Some(parent) => {
                    names.push(parent.name.clone());
                    current = parent.parent;
                }
                None => break,
            }
        }
        names.reverse();
        names
    }

    /// Slash-separated display path, e.g. `Nightly/db/backup.sh`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = self.ancestor_names(id);
        if let Some(node) = self.node(id) {
            parts.push(node.name.clone());
        }
        parts.join("/")
    }

    /// Resolve a slash-separated display path. The first match wins when
    /// siblings share a name.
    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = self
            .roots
            .iter()
            .copied()
            .find(|r| self.node(*r).is_some_and(|n| n.name == first))?;

        for segment in segments {
            current = self
                .children(current)
                .iter()
                .copied()
                .find(|c| self.node(*c).is_some_and(|n| n.name == segment))?;
        }
        Some(current)
    }

    /// All script leaves in depth-first tree order.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            if node.is_script() {
                out.push(id);
            } else {
                stack.extend(node.children().iter().rev().copied());
            }
        }
        out
    }

    pub fn reset_run_states(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.run_state = RunState::NeverRun;
        }
    }

    fn push(&mut self, node: ProjectNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        id
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(NodeKind::Group { children }) = self.node_mut(parent).map(|n| &mut n.kind) {
            children.push(child);
        }
    }

    fn ensure_group(&self, id: NodeId) -> Result<()> {
        match self.node(id) {
            Some(node) if node.is_group() => Ok(()),
            Some(_) => Err(TreerunError::ConfigError(format!(
                "node {id} is a script and cannot have children"
            ))),
            None => Err(TreerunError::NodeNotFound(id.to_string())),
        }
    }
}
