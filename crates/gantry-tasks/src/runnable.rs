//! Runnable composition tree
//!
//! A [`Runnable`] is a closed set of node kinds: leaves wrapping async
//! functions, named tasks, serial and parallel combinators, and path-scoped
//! subtrees. Trees are immutable and cheap to clone; every node is behind an
//! `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::context::{RunContext, TaskOptions};
use crate::detect::DetectFunc;
use crate::error::{PlanError, TaskError};
use crate::listing::{is_within, normalize_dir, DirCache, ROOT_DIR};
use crate::process::ProcessCommand;
use crate::task::Task;

/// Function stored in a [`Leaf`]
pub type LeafFn = dyn Fn(RunContext) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync;

/// An anonymous unit of work
#[derive(Clone)]
pub struct Leaf {
    label: Arc<str>,
    func: Arc<LeafFn>,
}

impl Leaf {
    /// Short description, used in logs
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn call(&self, ctx: RunContext) -> BoxFuture<'static, Result<(), TaskError>> {
        (self.func)(ctx)
    }
}

/// A node of the composition tree
#[derive(Clone)]
pub enum Runnable {
    Leaf(Leaf),
    Task(Arc<Task>),
    Serial(Arc<[Runnable]>),
    Parallel(Arc<[Runnable]>),
    PathScoped(Arc<PathScoped>),
}

impl Runnable {
    /// Wrap an async function
    pub fn leaf<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self::Leaf(Leaf {
            label: Arc::from(label.into()),
            func: Arc::new(move |ctx| f(ctx).boxed()),
        })
    }

    /// Run a shell command in the context's directory
    pub fn shell(command: impl Into<String>) -> Self {
        Self::command(ProcessCommand::shell(command))
    }

    /// Run an external process in the context's directory
    pub fn command(command: ProcessCommand) -> Self {
        let label = command.display().to_string();
        Self::leaf(label, move |ctx| {
            let command = command.clone();
            async move { command.run(&ctx).await }
        })
    }

    /// Run children one after another, stopping at the first error
    pub fn serial(children: impl IntoIterator<Item = Runnable>) -> Self {
        Self::Serial(children.into_iter().collect())
    }

    /// Run children concurrently and wait for all of them
    pub fn parallel(children: impl IntoIterator<Item = Runnable>) -> Self {
        Self::Parallel(children.into_iter().collect())
    }

    /// Run this runnable once per directory selected by `spec`
    pub fn run_in(self, spec: PathSpec) -> Self {
        Self::PathScoped(Arc::new(PathScoped {
            id: ScopeId::next(),
            inner: self,
            spec,
        }))
    }

    /// The task at this node, if it is one
    pub fn as_task(&self) -> Option<&Arc<Task>> {
        match self {
            Self::Task(task) => Some(task),
            _ => None,
        }
    }

    /// Short description of the node kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::Task(_) => "task",
            Self::Serial(_) => "serial",
            Self::Parallel(_) => "parallel",
            Self::PathScoped(_) => "path-scoped",
        }
    }
}

impl From<Task> for Runnable {
    fn from(task: Task) -> Self {
        Self::Task(Arc::new(task))
    }
}

impl From<Arc<Task>> for Runnable {
    fn from(task: Arc<Task>) -> Self {
        Self::Task(task)
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(leaf) => f.debug_tuple("Leaf").field(&leaf.label()).finish(),
            Self::Task(task) => f.debug_tuple("Task").field(&task.name()).finish(),
            Self::Serial(children) => f.debug_tuple("Serial").field(children).finish(),
            Self::Parallel(children) => f.debug_tuple("Parallel").field(children).finish(),
            Self::PathScoped(scoped) => f
                .debug_struct("PathScoped")
                .field("id", &scoped.id)
                .field("spec", &scoped.spec)
                .field("inner", &scoped.inner)
                .finish(),
        }
    }
}

/// Identity of one path-scoped node, used to look up its resolved paths in the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A runnable bound to a set of directories
#[derive(Debug)]
pub struct PathScoped {
    id: ScopeId,
    inner: Runnable,
    spec: PathSpec,
}

impl PathScoped {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn inner(&self) -> &Runnable {
        &self.inner
    }

    pub fn spec(&self) -> &PathSpec {
        &self.spec
    }
}

/// Which directories a path-scoped runnable runs in
#[derive(Debug, Clone, Default)]
pub struct PathSpec {
    paths: Vec<String>,
    detect: Option<DetectFunc>,
    exclude: Vec<String>,
    overrides: BTreeMap<String, TaskOptions>,
}

impl PathSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories to include as declared, relative to the repository root
    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.paths
            .extend(paths.into_iter().map(|p| normalize_dir(p.as_ref())));
        self
    }

    /// Select directories from the repository listing
    pub fn detect(mut self, detect: DetectFunc) -> Self {
        self.detect = Some(detect);
        self
    }

    /// Drop directories matching any of these globs (or lying below a match)
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Option overrides applied when running in `path`
    pub fn override_options(mut self, path: &str, options: TaskOptions) -> Self {
        self.overrides.insert(normalize_dir(path), options);
        self
    }

    pub fn include_paths(&self) -> &[String] {
        &self.paths
    }

    pub fn detect_func(&self) -> Option<&DetectFunc> {
        self.detect.as_ref()
    }

    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude
    }

    /// Overrides for `path`, empty when none are declared
    pub fn overrides_for(&self, path: &str) -> TaskOptions {
        self.overrides.get(path).cloned().unwrap_or_default()
    }

    /// Resolve the directory set: declared paths plus detected ones, minus
    /// excluded ones, sorted and deduplicated
    pub fn resolve(&self, dirs: &DirCache) -> Result<Vec<String>, PlanError> {
        let excluded = compile_excludes(&self.exclude)?;

        let mut resolved = self.paths.clone();
        if let Some(detect) = &self.detect {
            let listing = dirs.dirs();
            resolved.extend(detect.apply(&listing, dirs.root()));
        }

        resolved.retain(|dir| !is_excluded(&excluded, dir));
        resolved.sort();
        resolved.dedup();
        Ok(resolved)
    }
}

fn compile_excludes(patterns: &[String]) -> Result<GlobSet, PlanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| PlanError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| PlanError::InvalidPattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}

fn is_excluded(excluded: &GlobSet, dir: &str) -> bool {
    if excluded.is_empty() || dir == ROOT_DIR {
        return false;
    }
    let mut prefix = String::with_capacity(dir.len());
    for part in dir.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        if excluded.is_match(&prefix) {
            return true;
        }
    }
    false
}

/// Keep only the directories equal to or below `current`
pub(crate) fn within_scope(resolved: &[String], current: &str) -> Vec<String> {
    resolved
        .iter()
        .filter(|dir| is_within(dir, current))
        .cloned()
        .collect()
}
