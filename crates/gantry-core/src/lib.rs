//! Gantry Core - configuration and shared types for the Gantry task runner
//!
//! This crate provides the configuration file format, its loading and
//! validation, the error taxonomy shared by the other crates, and repository
//! root discovery.

pub mod config;
pub mod error;
pub mod repo;

pub use config::{load_config, load_config_from_dir, Config, RunStep, TaskConfig};
pub use error::{ConfigError, GantryError, RepoError, Result};
pub use repo::{find_git_root, project_root};
