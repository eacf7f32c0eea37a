//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry configuration and repository operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Repository discovery errors
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found in {0} or any parent directory")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// A task or run step names a task that is not declared
    #[error("Unknown task '{name}' referenced from {referenced_from}")]
    UnknownTask {
        name: String,
        referenced_from: String,
    },

    /// Task requirements form a cycle
    #[error("Cyclic task requirements among: {0}")]
    CyclicRequirement(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Repository discovery errors
#[derive(Debug, Error)]
pub enum RepoError {
    /// Path is not inside a git repository
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    /// Repository has no working directory
    #[error("Repository at {0} is bare")]
    Bare(PathBuf),

    /// Git2 library error
    #[error("Git error: {0}")]
    Git2(#[from] git2::Error),
}

impl GantryError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error stems from configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
