#![allow(dead_code)]

use std::path::Path;

use treerun::project::{NodeId, Project, ScriptConfig};

/// Builder for `Project` trees addressed by display path.
///
/// ```ignore
/// let project = ProjectBuilder::new()
///     .group("A", true)
///     .script("A", ScriptConfigBuilder::new("/bin/l1.sh"), true)
///     .subgroup("A", "B", false)
///     .script("A/B", ScriptConfigBuilder::new("/bin/l2.sh"), true)
///     .build();
/// ```
pub struct ProjectBuilder {
    project: Project,
}

impl ProjectBuilder {
    pub fn new() -> Self {
        Self {
            project: Project::new(),
        }
    }

    pub fn group(mut self, name: &str, enabled: bool) -> Self {
        self.project
            .add_group(name, enabled)
            .expect("group name must be valid");
        self
    }

    pub fn subgroup(mut self, parent: &str, name: &str, enabled: bool) -> Self {
        let parent = self.lookup(parent);
        self.project
            .add_subgroup(parent, name, enabled)
            .expect("subgroup parent must be a group");
        self
    }

    pub fn script(mut self, parent: &str, script: impl Into<ScriptConfig>, enabled: bool) -> Self {
        let parent = self.lookup(parent);
        self.project
            .add_script(parent, script.into(), enabled)
            .expect("script parent must be a group");
        self
    }

    pub fn build(self) -> Project {
        self.project
    }

    fn lookup(&self, path: &str) -> NodeId {
        self.project
            .find_by_path(path)
            .unwrap_or_else(|| panic!("no node at path {path:?}"))
    }
}

impl Default for ProjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ScriptConfig`.
pub struct ScriptConfigBuilder {
    script: ScriptConfig,
}

impl ScriptConfigBuilder {
    pub fn new(executable: impl AsRef<Path>) -> Self {
        Self {
            script: ScriptConfig::new(executable.as_ref()),
        }
    }

    pub fn repeat(mut self, count: u32) -> Self {
        self.script = self.script.with_repeat(count);
        self
    }

    pub fn delay(mut self, seconds: u64) -> Self {
        self.script = self.script.with_delay(seconds);
        self
    }

    pub fn parameters(mut self, params: &str) -> Self {
        self.script = self.script.with_parameters(params);
        self
    }

    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.script = self.script.with_env(name, value);
        self
    }

    pub fn build(self) -> ScriptConfig {
        self.script
    }
}

impl From<ScriptConfigBuilder> for ScriptConfig {
    fn from(builder: ScriptConfigBuilder) -> Self {
        builder.build()
    }
}
