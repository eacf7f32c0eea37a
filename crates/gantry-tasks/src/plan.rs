//! Execution plan
//!
//! A [`Plan`] is built by one pass over the composition tree before anything
//! runs. It lists every reachable task, the directories each path-scoped task
//! resolves to, and the union of those directories. Once built it is shared
//! read-only through the run context.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::PlanError;
use crate::listing::{is_within, DirCache, ROOT_DIR};
use crate::runnable::{PathSpec, Runnable, ScopeId};
use crate::task::{Task, TaskInfo};

/// Directories a path-scoped task runs in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    /// Directories declared explicitly
    #[serde(default)]
    pub include_paths: Vec<String>,
    /// Descriptions of the detection functions used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detect: Vec<String>,
    /// Exclude globs applied after resolution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Directories the task will actually run in
    #[serde(default)]
    pub resolved_paths: Vec<String>,
}

/// Immutable snapshot of a composition tree against a repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Every reachable task, in first-visit order
    pub tasks: Vec<TaskInfo>,
    /// Path mapping per path-scoped task
    pub path_mappings: BTreeMap<String, PathMapping>,
    /// Sorted union of all resolved directories
    pub module_directories: Vec<String>,
    #[serde(skip)]
    pub(crate) scopes: HashMap<ScopeId, Arc<Vec<String>>>,
}

impl Plan {
    /// Tasks shown in default listings
    pub fn visible_tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.iter().filter(|t| !t.hidden)
    }

    pub fn task(&self, name: &str) -> Option<&TaskInfo> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn mapping(&self, name: &str) -> Option<&PathMapping> {
        self.path_mappings.get(name)
    }

    /// Directories resolved for one path-scoped node
    pub fn resolved_paths(&self, id: ScopeId) -> Option<&Arc<Vec<String>>> {
        self.scopes.get(&id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// CI matrix with one entry per module directory
    pub fn matrix(&self) -> serde_json::Value {
        let include: Vec<serde_json::Value> = self
            .module_directories
            .iter()
            .map(|path| serde_json::json!({ "path": path }))
            .collect();
        serde_json::json!({ "include": include })
    }

    /// Human-readable listing
    pub fn render_text(&self, show_hidden: bool) -> String {
        let mut out = String::new();
        let tasks: Vec<&TaskInfo> = self
            .tasks
            .iter()
            .filter(|t| show_hidden || !t.hidden)
            .collect();
        let width = tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);

        let _ = writeln!(out, "Tasks:");
        if tasks.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for task in &tasks {
            let mut markers = Vec::new();
            if task.hidden {
                markers.push("hidden");
            }
            if task.manual {
                markers.push("manual");
            }
            if task.global {
                markers.push("global");
            }
            let mut line = format!("  {:<width$}  {}", task.name, task.usage, width = width);
            if !markers.is_empty() {
                let _ = write!(line, " [{}]", markers.join(", "));
            }
            let _ = writeln!(out, "{}", line.trim_end());
        }

        let mappings: Vec<_> = self
            .path_mappings
            .iter()
            .filter(|(name, _)| show_hidden || self.task(name).map_or(true, |t| !t.hidden))
            .collect();
        if !mappings.is_empty() {
            let _ = writeln!(out, "\nPath mappings:");
            for (name, mapping) in mappings {
                let _ = writeln!(out, "  {}", name);
                if !mapping.include_paths.is_empty() {
                    let _ = writeln!(out, "    include: {}", mapping.include_paths.join(", "));
                }
                if !mapping.detect.is_empty() {
                    let _ = writeln!(out, "    detect:  {}", mapping.detect.join(", "));
                }
                if !mapping.exclude.is_empty() {
                    let _ = writeln!(out, "    exclude: {}", mapping.exclude.join(", "));
                }
                let resolved = if mapping.resolved_paths.is_empty() {
                    "(none)".to_string()
                } else {
                    mapping.resolved_paths.join(", ")
                };
                let _ = writeln!(out, "    paths:   {}", resolved);
            }
        }

        if !self.module_directories.is_empty() {
            let _ = writeln!(out, "\nModule directories:");
            for dir in &self.module_directories {
                let _ = writeln!(out, "  {}", dir);
            }
        }
        out
    }
}

#[derive(Default)]
struct MappingAcc {
    include_paths: BTreeSet<String>,
    detect: BTreeSet<String>,
    exclude: BTreeSet<String>,
    resolved_paths: BTreeSet<String>,
}

struct Frame<'a> {
    id: ScopeId,
    spec: &'a PathSpec,
    effective: Arc<Vec<String>>,
}

/// Builds a [`Plan`] in one walk of the tree, resolving scopes through a shared listing
pub struct PlanBuilder<'a> {
    dirs: &'a DirCache,
    tasks: Vec<TaskInfo>,
    seen: HashMap<String, Arc<Task>>,
    visited: HashSet<(usize, Option<ScopeId>)>,
    mappings: BTreeMap<String, MappingAcc>,
    scopes: HashMap<ScopeId, Arc<Vec<String>>>,
    modules: BTreeSet<String>,
    /// Leaves and non-global tasks seen under a path scope so far
    scoped_work: usize,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(dirs: &'a DirCache) -> Self {
        Self {
            dirs,
            tasks: Vec::new(),
            seen: HashMap::new(),
            visited: HashSet::new(),
            mappings: BTreeMap::new(),
            scopes: HashMap::new(),
            modules: BTreeSet::new(),
            scoped_work: 0,
        }
    }

    /// Walk every root and produce the plan
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub fn build(mut self, roots: &[Runnable]) -> Result<Plan, PlanError> {
        for root in roots {
            self.visit(root, None)?;
        }

        let plan = Plan {
            tasks: self.tasks,
            path_mappings: self
                .mappings
                .into_iter()
                .map(|(name, acc)| {
                    (
                        name,
                        PathMapping {
                            include_paths: acc.include_paths.into_iter().collect(),
                            detect: acc.detect.into_iter().collect(),
                            exclude: acc.exclude.into_iter().collect(),
                            resolved_paths: acc.resolved_paths.into_iter().collect(),
                        },
                    )
                })
                .collect(),
            module_directories: self.modules.into_iter().collect(),
            scopes: self.scopes,
        };
        info!(
            tasks = plan.tasks.len(),
            scoped_tasks = plan.path_mappings.len(),
            modules = plan.module_directories.len(),
            "built plan"
        );
        Ok(plan)
    }

    fn visit(&mut self, node: &Runnable, enclosing: Option<&Frame<'_>>) -> Result<(), PlanError> {
        match node {
            Runnable::Leaf(_) => {
                if enclosing.is_some() {
                    self.scoped_work += 1;
                }
                Ok(())
            }
            Runnable::Serial(children) | Runnable::Parallel(children) => {
                for child in children.iter() {
                    self.visit(child, enclosing)?;
                }
                Ok(())
            }
            Runnable::Task(task) => self.visit_task(task, enclosing),
            Runnable::PathScoped(scoped) => {
                let id = scoped.id();
                let resolved = match self.scopes.get(&id) {
                    Some(resolved) => resolved.clone(),
                    None => {
                        let resolved = Arc::new(scoped.spec().resolve(self.dirs)?);
                        debug!(scope = ?id, count = resolved.len(), "resolved path scope");
                        self.scopes.insert(id, resolved.clone());
                        resolved
                    }
                };

                let effective = match enclosing {
                    Some(outer) => Arc::new(
                        resolved
                            .iter()
                            .filter(|dir| outer.effective.iter().any(|o| is_within(dir, o)))
                            .cloned()
                            .collect(),
                    ),
                    None => resolved,
                };

                let before = self.scoped_work;
                let frame = Frame {
                    id,
                    spec: scoped.spec(),
                    effective,
                };
                self.visit(scoped.inner(), Some(&frame))?;
                // Only scopes with non-global work count as module directories
                if self.scoped_work > before {
                    self.modules.extend(frame.effective.iter().cloned());
                }
                Ok(())
            }
        }
    }

    fn visit_task(&mut self, task: &Arc<Task>, enclosing: Option<&Frame<'_>>) -> Result<(), PlanError> {
        let name = task.name();
        if name.trim().is_empty() {
            return Err(PlanError::MissingField("task name".to_string()));
        }

        match self.seen.get(name) {
            Some(existing) if !Arc::ptr_eq(existing, task) => {
                return Err(PlanError::DuplicateTask(name.to_string()));
            }
            Some(_) => {}
            None => {
                self.seen.insert(name.to_string(), task.clone());
                self.tasks.push(task.info());
            }
        }

        if task.is_global() {
            if enclosing.is_some() {
                self.mappings
                    .entry(name.to_string())
                    .or_default()
                    .resolved_paths
                    .insert(ROOT_DIR.to_string());
            }
            let saved = self.scoped_work;
            if self.visited.insert((Arc::as_ptr(task) as usize, None)) {
                self.visit(task.body(), None)?;
            }
            self.scoped_work = saved;
            return Ok(());
        }

        if let Some(frame) = enclosing {
            self.scoped_work += 1;
            let acc = self.mappings.entry(name.to_string()).or_default();
            acc.include_paths
                .extend(frame.spec.include_paths().iter().cloned());
            if let Some(detect) = frame.spec.detect_func() {
                acc.detect.insert(detect.description().to_string());
            }
            acc.exclude
                .extend(frame.spec.exclude_patterns().iter().cloned());
            acc.resolved_paths.extend(frame.effective.iter().cloned());
        }

        let key = (Arc::as_ptr(task) as usize, enclosing.map(|f| f.id));
        if self.visited.insert(key) {
            self.visit(task.body(), enclosing)?;
        }
        Ok(())
    }
}
