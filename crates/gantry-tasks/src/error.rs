//! Engine error types

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised while building a [`Plan`](crate::plan::Plan).
///
/// These are configuration errors: they are fatal before any task runs.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Two distinct tasks share a name
    #[error("Duplicate task name '{0}': two different tasks are declared with it")]
    DuplicateTask(String),

    /// A declaration is missing a required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// An exclude pattern does not compile
    #[error("Invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors raised while executing a runnable tree.
///
/// Cloneable so the dedup cache can hand the very same error to every caller
/// waiting on a task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// An external command exited unsuccessfully
    #[error("{}: `{command}` failed in {path} ({})", task_label(.task), exit_label(.code))]
    Command {
        task: Option<String>,
        path: String,
        command: String,
        code: Option<i32>,
    },

    /// An external command could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A task body reported a failure
    #[error("{0}")]
    Failed(String),

    /// A task body panicked
    #[error("{task} panicked: {message}")]
    Panicked { task: String, message: String },

    /// Execution was interrupted
    #[error("interrupted")]
    Cancelled,

    /// IO failure inside the engine (e.g. flushing buffered output)
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

fn task_label(task: &Option<String>) -> &str {
    task.as_deref().unwrap_or("command")
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl TaskError {
    /// Create a failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Whether this error means the run was interrupted rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Convert a caught panic payload into an error attributed to `task`
    pub fn from_panic(task: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked {
            task: task.into(),
            message,
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(format!("{:#}", e))
    }
}
