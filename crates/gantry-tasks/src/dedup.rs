//! Per-execution task deduplication
//!
//! Each [`DedupKey`] maps to a single-flight cell. The first caller runs the
//! body; every concurrent or later caller waits on the same cell and receives
//! an identical result.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::error::TaskError;
use crate::task::Task;

/// Where a task invocation is deduplicated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupScope {
    /// Once per execution, whatever the path
    Global,
    /// Once per directory
    Path(String),
}

/// Identity of one task invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub task: String,
    pub scope: DedupScope,
}

impl DedupKey {
    /// Key for running `task` at `path`
    pub fn for_task(task: &Task, path: &str) -> Self {
        let scope = if task.is_global() {
            DedupScope::Global
        } else {
            DedupScope::Path(path.to_string())
        };
        Self {
            task: task.name().to_string(),
            scope,
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            DedupScope::Global => write!(f, "{} (global)", self.task),
            DedupScope::Path(path) => write!(f, "{} @ {}", self.task, path),
        }
    }
}

type Cell = Arc<OnceCell<Result<(), TaskError>>>;

/// Single-flight result cache for one execution
#[derive(Debug, Default)]
pub struct DedupCache {
    cells: Mutex<HashMap<DedupKey, Cell>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` unless `key` already ran or is running.
    ///
    /// Returns the shared result and whether this call executed the body.
    pub async fn run_once<F, Fut>(&self, key: DedupKey, body: F) -> (Result<(), TaskError>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), TaskError>>,
    {
        let cell = self.cell(key);
        let mut executed = false;
        let result = cell
            .get_or_init(|| {
                executed = true;
                body()
            })
            .await
            .clone();
        (result, executed)
    }

    /// Completed result for `key`, if any
    pub fn result(&self, key: &DedupKey) -> Option<Result<(), TaskError>> {
        self.lock().get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of distinct keys seen
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn cell(&self, key: DedupKey) -> Cell {
        self.lock().entry(key).or_default().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DedupKey, Cell>> {
        self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
