//! Repository root discovery
//!
//! Path scopes, detection and the directory listing are all expressed relative
//! to the root of the git working tree containing the configuration.

use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{debug, info, instrument};

use crate::error::RepoError;

/// Find the root of the git working tree containing `start_path`
#[instrument(fields(start_path = %start_path.display()))]
pub fn find_git_root(start_path: &Path) -> Result<PathBuf, RepoError> {
    let repo = Repository::discover(start_path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            RepoError::NotARepository(start_path.to_path_buf())
        } else {
            RepoError::Git2(e)
        }
    })?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| RepoError::Bare(repo.path().to_path_buf()))?;
    let root = workdir
        .canonicalize()
        .unwrap_or_else(|_| workdir.to_path_buf());
    info!(root = %root.display(), "git root discovered");
    Ok(root)
}

/// Resolve the project root: the git root when there is one, otherwise `fallback`
pub fn project_root(start_path: &Path, fallback: &Path) -> PathBuf {
    match find_git_root(start_path) {
        Ok(root) => root,
        Err(e) => {
            debug!(error = %e, fallback = %fallback.display(), "not in a git repository");
            fallback.to_path_buf()
        }
    }
}
