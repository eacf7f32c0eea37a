//! Directory detection functions
//!
//! A [`DetectFunc`] filters the cached directory listing down to the
//! directories a path-scoped runnable should run in. Detection functions only
//! perform read-only existence checks.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Signature of a detection predicate: `(dirs, git_root) -> selected dirs`
pub type DetectFn = dyn Fn(&[String], &Path) -> Vec<String> + Send + Sync;

/// Named, shareable detection predicate
#[derive(Clone)]
pub struct DetectFunc {
    description: Arc<str>,
    func: Arc<DetectFn>,
}

impl DetectFunc {
    /// Wrap a custom predicate
    pub fn new<F>(description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[String], &Path) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            description: Arc::from(description.into()),
            func: Arc::new(func),
        }
    }

    /// Human-readable description, shown in the plan
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Select directories from `dirs` (relative to `git_root`)
    pub fn apply(&self, dirs: &[String], git_root: &Path) -> Vec<String> {
        (self.func)(dirs, git_root)
    }
}

impl fmt::Debug for DetectFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DetectFunc").field(&self.description).finish()
    }
}

/// Select directories containing at least one of the given marker files
pub fn detect_by_file<I, S>(names: I) -> DetectFunc
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    DetectFunc::new(format!("file:{}", names.join("|")), move |dirs, root| {
        dirs.iter()
            .filter(|dir| names.iter().any(|name| root.join(dir.as_str()).join(name).is_file()))
            .cloned()
            .collect()
    })
}

/// Select directories containing at least one of the given marker directories
pub fn detect_by_dir<I, S>(names: I) -> DetectFunc
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    DetectFunc::new(format!("dir:{}", names.join("|")), move |dirs, root| {
        dirs.iter()
            .filter(|dir| names.iter().any(|name| root.join(dir.as_str()).join(name).is_dir()))
            .cloned()
            .collect()
    })
}
