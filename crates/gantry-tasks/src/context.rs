//! Per-branch execution context

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::TaskError;
use crate::execution::Engine;
use crate::listing::{normalize_dir, ROOT_DIR};
use crate::output::{Output, OutputSink};
use crate::plan::Plan;
use crate::task::Task;

/// How much output the run produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Resolved option values for one task invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TaskOptions {
    values: BTreeMap<String, String>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of an option
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Whether an option is set to a truthy value (`true`, `1`, `yes`, `on`)
    pub fn get_bool(&self, name: &str) -> bool {
        matches!(
            self.get(name).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("true" | "1" | "yes" | "on")
        )
    }

    /// Parse an option into `T`, failing when the value does not parse
    pub fn get_parsed<T>(&self, name: &str) -> Result<Option<T>, TaskError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                TaskError::failed(format!("invalid value '{}' for option '{}': {}", raw, name, e))
            }),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of `self` with every value from `other` laid on top
    pub fn merged(&self, other: &TaskOptions) -> TaskOptions {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        TaskOptions { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TaskOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Context handed to every runnable.
///
/// Cheap to clone. Contexts are never mutated; path scopes, tasks, parallel
/// children and output redirection each derive a new one.
#[derive(Clone)]
pub struct RunContext {
    pub(crate) engine: Arc<Engine>,
    root: Arc<PathBuf>,
    path: Arc<str>,
    task: Option<Arc<Task>>,
    branch: Arc<TaskOptions>,
    cli: Arc<TaskOptions>,
    options: Arc<TaskOptions>,
    output: Output,
    cancel: CancelToken,
}

impl RunContext {
    pub(crate) fn new(engine: Arc<Engine>, root: PathBuf, output: Output, cancel: CancelToken) -> Self {
        Self {
            engine,
            root: Arc::new(root),
            path: Arc::from(ROOT_DIR),
            task: None,
            branch: Arc::new(TaskOptions::new()),
            cli: Arc::new(TaskOptions::new()),
            options: Arc::new(TaskOptions::new()),
            output,
            cancel,
        }
    }

    /// Current directory, relative to the repository root (`.` for the root)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current directory as an absolute path
    pub fn abs_path(&self) -> PathBuf {
        if &*self.path == ROOT_DIR {
            self.root.as_ref().clone()
        } else {
            self.root.join(&*self.path)
        }
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn verbosity(&self) -> Verbosity {
        self.engine.options.verbosity
    }

    pub fn is_verbose(&self) -> bool {
        self.verbosity() == Verbosity::Verbose
    }

    /// Options of the task currently running, after path and command-line overrides
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Standard output sink of this branch
    pub fn out(&self) -> &Arc<dyn OutputSink> {
        self.output.stdout()
    }

    /// Standard error sink of this branch
    pub fn err(&self) -> &Arc<dyn OutputSink> {
        self.output.stderr()
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.engine.plan
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Name of the innermost task this context runs under
    pub fn task_name(&self) -> Option<&str> {
        self.task.as_ref().map(|t| t.name())
    }

    /// Time a cancelled subprocess gets between interrupt and forced kill
    pub fn grace(&self) -> Duration {
        self.engine.options.grace
    }

    /// Derive a context scoped to `path`, with per-path option overrides
    pub fn scoped(&self, path: &str, overrides: &TaskOptions) -> RunContext {
        let mut next = self.clone();
        next.path = Arc::from(normalize_dir(path));
        if !overrides.is_empty() {
            next.branch = Arc::new(self.branch.merged(overrides));
            next.options = Arc::new(next.resolve_options());
        }
        next
    }

    /// Derive a context at the repository root with no path overrides
    pub(crate) fn at_root(&self) -> RunContext {
        let mut next = self.clone();
        next.path = Arc::from(ROOT_DIR);
        next.branch = Arc::new(TaskOptions::new());
        next.options = Arc::new(next.resolve_options());
        next
    }

    /// Derive a context for running `task`, with its command-line flag values
    pub fn for_task(&self, task: &Arc<Task>, cli: TaskOptions) -> RunContext {
        let mut next = self.clone();
        next.task = Some(task.clone());
        next.cli = Arc::new(cli);
        next.options = Arc::new(next.resolve_options());
        next
    }

    /// Derive a context writing to another output
    pub fn with_output(&self, output: Output) -> RunContext {
        let mut next = self.clone();
        next.output = output;
        next
    }

    /// Derive a context observing another cancellation token
    pub fn with_cancel(&self, cancel: CancelToken) -> RunContext {
        let mut next = self.clone();
        next.cancel = cancel;
        next
    }

    fn resolve_options(&self) -> TaskOptions {
        match &self.task {
            Some(task) => task.resolve_options(&self.branch, &self.cli),
            None => self.branch.as_ref().clone(),
        }
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("root", &self.root)
            .field("path", &self.path)
            .field("task", &self.task_name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
