//! Gantry Tasks - task composition and execution engine
//!
//! This crate provides the runnable tree (leaves, tasks, serial and parallel
//! groups, path scopes), the plan built from it in a single pass, and the
//! executor that runs it with per-scope deduplication, buffered parallel
//! output and cooperative cancellation.

pub mod builtin;
pub mod cancel;
pub mod compose;
pub mod context;
pub mod dedup;
pub mod detect;
pub mod error;
pub mod execution;
pub mod listing;
pub mod output;
pub mod plan;
pub mod process;
pub mod reporter;
pub mod runnable;
pub mod task;

pub use builtin::{builtin_tasks, LIST_TASK, MATRIX_TASK, PLAN_TASK};
pub use cancel::CancelToken;
pub use compose::TaskSet;
pub use context::{RunContext, TaskOptions, Verbosity};
pub use dedup::{DedupCache, DedupKey, DedupScope};
pub use detect::{detect_by_dir, detect_by_file, DetectFunc};
pub use error::{PlanError, TaskError};
pub use execution::{ExecOptions, Execution, ExecutionBuilder, RunStats, DEFAULT_GRACE};
pub use listing::DirCache;
pub use output::{BufferedOutput, MemorySink, Output, OutputSink};
pub use plan::{PathMapping, Plan, PlanBuilder};
pub use process::ProcessCommand;
pub use reporter::{
    CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter,
};
pub use runnable::{PathSpec, Runnable};
pub use task::{FlagSpec, Task, TaskInfo};
