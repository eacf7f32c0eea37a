//! Cached repository directory listing
//!
//! Detection never touches the filesystem tree itself: it filters the listing
//! produced here, which is walked at most once per [`DirCache`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};
use walkdir::WalkDir;

/// Relative path used for the repository root itself
pub const ROOT_DIR: &str = ".";

/// Write-once listing of every directory under a root
#[derive(Debug)]
pub struct DirCache {
    root: PathBuf,
    skip: Vec<String>,
    dirs: OnceLock<Arc<Vec<String>>>,
    walks: AtomicUsize,
}

impl DirCache {
    /// Create a cache for `root`, never descending into directories named in `skip`
    pub fn new(root: impl Into<PathBuf>, skip: Vec<String>) -> Self {
        Self {
            root: root.into(),
            skip,
            dirs: OnceLock::new(),
            walks: AtomicUsize::new(0),
        }
    }

    /// The root all listed paths are relative to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every directory under the root, sorted, `/`-separated, `.` for the root.
    ///
    /// The first call walks the filesystem; concurrent first callers block until
    /// that walk is done and every later call returns the cached listing.
    pub fn dirs(&self) -> Arc<Vec<String>> {
        self.dirs
            .get_or_init(|| {
                self.walks.fetch_add(1, Ordering::SeqCst);
                Arc::new(walk_dirs(&self.root, &self.skip))
            })
            .clone()
    }

    /// Number of filesystem walks performed so far (0 or 1)
    pub fn walk_count(&self) -> usize {
        self.walks.load(Ordering::SeqCst)
    }
}

fn walk_dirs(root: &Path, skip: &[String]) -> Vec<String> {
    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if !entry.file_type().is_dir() {
                return false;
            }
            let name = entry.file_name().to_string_lossy();
            !name.starts_with('.') && !skip.iter().any(|s| *s == name)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        dirs.push(relative_dir(root, entry.path()));
    }

    dirs.sort();
    info!(root = %root.display(), count = dirs.len(), "listed repository directories");
    dirs
}

/// Express `path` relative to `root` with `/` separators (`.` for the root)
pub fn relative_dir(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ROOT_DIR.to_string()
    } else {
        parts.join("/")
    }
}

/// Normalize a user-supplied relative directory (`./a/b/` becomes `a/b`)
pub fn normalize_dir(dir: &str) -> String {
    let parts: Vec<&str> = dir
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        ROOT_DIR.to_string()
    } else {
        parts.join("/")
    }
}

/// Whether `dir` is `scope` itself or lies below it
pub fn is_within(dir: &str, scope: &str) -> bool {
    scope == ROOT_DIR
        || dir == scope
        || (dir.len() > scope.len() && dir.starts_with(scope) && dir.as_bytes()[scope.len()] == b'/')
}
