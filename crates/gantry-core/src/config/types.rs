//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Main configuration for Gantry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Project name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Engine settings
    pub settings: Settings,

    /// Declared tasks, keyed by task name
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Default run tree. When absent every non-manual task runs in parallel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunStep>,
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Milliseconds between interrupting a subprocess and killing it
    pub shutdown_grace_ms: u64,

    /// Directory names never descended into when listing the repository
    pub skip_dirs: Vec<String>,

    /// Shell used for `run` commands (defaults to `sh`, or `cmd` on Windows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 5_000,
            skip_dirs: vec![
                "target".to_string(),
                "node_modules".to_string(),
                "vendor".to_string(),
            ],
            shell: None,
        }
    }
}

/// A task declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// One-line help text
    pub usage: String,

    /// Shell commands, executed in order
    pub run: Vec<String>,

    /// Tasks that run (in order) before this task's commands
    pub requires: Vec<String>,

    /// Flags accepted by the task
    pub flags: BTreeMap<String, FlagConfig>,

    /// Per-directory flag overrides, keyed by directory
    pub path_flags: BTreeMap<String, BTreeMap<String, ScalarValue>>,

    /// Marker files selecting the directories the task runs in
    pub detect: Vec<String>,

    /// Marker directories selecting the directories the task runs in
    pub detect_dirs: Vec<String>,

    /// Explicit directories the task runs in
    pub paths: Vec<String>,

    /// Glob patterns removing directories from the resolved set
    pub exclude: Vec<String>,

    /// Extra environment variables for the task's commands
    pub env: BTreeMap<String, String>,

    /// Exclude from the default task listing
    pub hidden: bool,

    /// Run at most once per execution regardless of path
    pub global: bool,

    /// Only run when named explicitly
    pub manual: bool,
}

impl TaskConfig {
    /// Whether the task declares any path scoping
    pub fn is_path_scoped(&self) -> bool {
        !self.detect.is_empty() || !self.detect_dirs.is_empty() || !self.paths.is_empty()
    }
}

/// A task flag declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagConfig {
    /// Default value
    pub default: ScalarValue,

    /// Help text
    pub help: String,
}

/// A scalar flag value as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Default for ScalarValue {
    fn default() -> Self {
        Self::String(String::new())
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// One step of the run tree: a task name or a serial/parallel group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunStep {
    /// Reference to a declared task
    Task(String),
    /// A composed group
    Group(GroupStep),
}

/// A serial or parallel group, optionally path-scoped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupStep {
    /// Children run in order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<Vec<RunStep>>,

    /// Children run concurrently
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<Vec<RunStep>>,

    /// Marker files selecting directories for the whole group
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detect: Vec<String>,

    /// Explicit directories for the whole group
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    /// Glob patterns removing directories from the resolved set
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl GroupStep {
    /// Whether the group declares any path scoping
    pub fn is_path_scoped(&self) -> bool {
        !self.detect.is_empty() || !self.paths.is_empty()
    }
}

impl RunStep {
    /// Every task name referenced by this step, depth first
    pub fn task_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Task(name) => out.push(name),
            Self::Group(group) => {
                for child in group
                    .serial
                    .iter()
                    .chain(group.parallel.iter())
                    .flatten()
                {
                    child.collect_names(out);
                }
            }
        }
    }
}
