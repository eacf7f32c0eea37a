//! Exit codes for the CLI

use gantry_core::{ConfigError, GantryError};
use gantry_tasks::{PlanError, TaskError};

use crate::cli::UsageError;

/// Success
pub const SUCCESS: i32 = 0;

/// A task failed
pub const FAILURE: i32 = 1;

/// Configuration, plan or usage error; nothing was run
pub const CONFIG_ERROR: i32 = 2;

/// Interrupted by a signal
pub const CANCELLED: i32 = 130;

/// Pick the exit code for an error returned by a command
pub fn for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(task_err) = cause.downcast_ref::<TaskError>() {
            return if task_err.is_cancelled() {
                CANCELLED
            } else {
                FAILURE
            };
        }
        if cause.is::<GantryError>()
            || cause.is::<ConfigError>()
            || cause.is::<PlanError>()
            || cause.is::<UsageError>()
        {
            return CONFIG_ERROR;
        }
    }
    FAILURE
}
