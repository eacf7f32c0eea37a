//! Command-line flags for a named task

use gantry_tasks::{Task, TaskOptions};
use thiserror::Error;

/// Invalid task invocation on the command line
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Unknown task '{0}' (run `gantry list --all` to see every task)")]
    UnknownTask(String),

    #[error("Unknown flag '--{flag}' for task '{task}'{}", declared_hint(.declared))]
    UnknownFlag {
        task: String,
        flag: String,
        declared: Vec<String>,
    },

    #[error("Unexpected argument '{arg}' for task '{task}': flags are written --name value or --name=value")]
    UnexpectedArgument { task: String, arg: String },
}

fn declared_hint(declared: &[String]) -> String {
    if declared.is_empty() {
        " (the task declares no flags)".to_string()
    } else {
        format!(" (declared: {})", declared.join(", "))
    }
}

/// Parse `--flag value` and `--flag=value` pairs against the flags `task` declares.
///
/// A flag with no value (last argument, or followed by another flag) is set to
/// `true`.
pub fn parse_task_args(task: &Task, args: &[String]) -> Result<TaskOptions, UsageError> {
    let mut options = TaskOptions::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let Some(flag) = arg.strip_prefix("--").filter(|f| !f.is_empty()) else {
            return Err(UsageError::UnexpectedArgument {
                task: task.name().to_string(),
                arg: arg.clone(),
            });
        };

        let (name, value) = match flag.split_once('=') {
            Some((name, value)) => (name, value.to_string()),
            None => match iter.next_if(|next| !next.starts_with("--")) {
                Some(value) => (flag, value.clone()),
                None => (flag, "true".to_string()),
            },
        };

        if !task.flags().contains_key(name) {
            return Err(UsageError::UnknownFlag {
                task: task.name().to_string(),
                flag: name.to_string(),
                declared: task.flags().keys().cloned().collect(),
            });
        }
        options.set(name, value);
    }

    Ok(options)
}
