//! Locating the configuration and repository root

use std::path::{Path, PathBuf};
use std::time::Duration;

use gantry_core::{load_config, load_config_from_dir, project_root, Config};
use tracing::debug;

/// Loaded configuration and the root every path is relative to
#[derive(Debug)]
pub struct Workspace {
    pub config: Config,
    pub config_path: PathBuf,
    pub root: PathBuf,
}

impl Workspace {
    /// Load the configuration from `explicit` or by searching upward from `cwd`.
    ///
    /// The root is the git working tree containing the configuration file, or
    /// the file's directory outside of git.
    pub fn load(cwd: &Path, explicit: Option<&Path>) -> gantry_core::Result<Self> {
        let (config, config_path) = match explicit {
            Some(path) => {
                let path = cwd.join(path);
                (load_config(&path)?, path)
            }
            None => load_config_from_dir(cwd)?,
        };

        let config_dir = config_path.parent().unwrap_or(cwd);
        let root = project_root(config_dir, config_dir);
        debug!(config = %config_path.display(), root = %root.display(), "workspace loaded");

        Ok(Self {
            config,
            config_path,
            root,
        })
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.config.settings.shutdown_grace_ms)
    }

    pub fn skip_dirs(&self) -> Vec<String> {
        self.config.settings.skip_dirs.clone()
    }
}
