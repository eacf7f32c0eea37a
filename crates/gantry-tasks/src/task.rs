//! Named tasks

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::TaskOptions;
use crate::runnable::Runnable;

/// A flag a task accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSpec {
    /// Value used when neither a path override nor the command line sets one
    pub default: String,
    /// One-line description
    #[serde(default)]
    pub help: String,
}

/// Serializable description of a task, as listed in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub global: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, FlagSpec>,
}

/// A runnable with an identity.
///
/// Within one execution a task body runs at most once per directory, or once
/// overall for a global task.
pub struct Task {
    name: String,
    usage: String,
    flags: BTreeMap<String, FlagSpec>,
    body: Runnable,
    hidden: bool,
    global: bool,
    manual: bool,
}

impl Task {
    /// Create a task with the given body
    pub fn new(name: impl Into<String>, body: impl Into<Runnable>) -> Self {
        Self {
            name: name.into(),
            usage: String::new(),
            flags: BTreeMap::new(),
            body: body.into(),
            hidden: false,
            global: false,
            manual: false,
        }
    }

    /// Set the one-line usage text
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Declare a flag
    pub fn flag(
        mut self,
        name: impl Into<String>,
        default: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        self.flags.insert(
            name.into(),
            FlagSpec {
                default: default.into(),
                help: help.into(),
            },
        );
        self
    }

    /// Hide the task from default listings
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Run the body once per execution regardless of path
    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    /// Only run the task when it is requested by name
    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage_text(&self) -> &str {
        &self.usage
    }

    pub fn flags(&self) -> &BTreeMap<String, FlagSpec> {
        &self.flags
    }

    pub fn body(&self) -> &Runnable {
        &self.body
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Metadata recorded in the plan
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.name.clone(),
            usage: self.usage.clone(),
            hidden: self.hidden,
            manual: self.manual,
            global: self.global,
            flags: self.flags.clone(),
        }
    }

    /// Declared flag defaults
    pub fn defaults(&self) -> TaskOptions {
        self.flags
            .iter()
            .map(|(name, spec)| (name.clone(), spec.default.clone()))
            .collect()
    }

    /// Resolve option values: defaults, then path overrides for declared flags,
    /// then command-line values
    pub fn resolve_options(&self, branch: &TaskOptions, cli: &TaskOptions) -> TaskOptions {
        let mut options = self.defaults();
        for (name, value) in branch.iter() {
            if self.flags.contains_key(name) {
                options.set(name, value);
            }
        }
        options.merged(cli)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("hidden", &self.hidden)
            .field("global", &self.global)
            .field("manual", &self.manual)
            .field("flags", &self.flags)
            .field("body", &self.body)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("lint", Runnable::shell("cargo clippy"))
            .usage("Lint Rust code")
            .flag("strict", "false", "Deny warnings")
            .hidden(true)
            .global(false)
            .manual(true);

        assert_eq!(task.name(), "lint");
        assert_eq!(task.usage_text(), "Lint Rust code");
        assert!(task.is_hidden());
        assert!(!task.is_global());
        assert!(task.is_manual());
        assert_eq!(task.flags()["strict"].default, "false");
        assert_eq!(task.body().kind(), "leaf");
    }

    #[test]
    fn test_task_info() {
        let info = Task::new("test", Runnable::shell("cargo test"))
            .usage("Run tests")
            .global(true)
            .info();

        assert_eq!(info.name, "test");
        assert_eq!(info.usage, "Run tests");
        assert!(info.global);
        assert!(!info.hidden);
        assert!(info.flags.is_empty());
    }

    #[test]
    fn test_task_info_json_omits_empty_flags() {
        let info = Task::new("fmt", Runnable::shell("cargo fmt")).info();
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("flags").is_none());
        assert_eq!(json["name"], "fmt");
    }

    #[test]
    fn test_resolve_options_precedence() {
        let task = Task::new("lint", Runnable::shell("cargo clippy"))
            .flag("strict", "false", "")
            .flag("level", "1", "")
            .flag("target", "all", "");

        let branch: TaskOptions = [("strict", "true"), ("level", "2"), ("unknown", "x")]
            .into_iter()
            .collect();
        let cli: TaskOptions = [("level", "3")].into_iter().collect();

        let options = task.resolve_options(&branch, &cli);
        assert_eq!(options.get("strict"), Some("true"));
        assert_eq!(options.get("level"), Some("3"));
        assert_eq!(options.get("target"), Some("all"));
        assert_eq!(options.get("unknown"), None);
    }
}
