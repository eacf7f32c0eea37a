//! Task execution reporting

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Events emitted during execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A task body is starting
    Started { task: String, path: String },
    /// A task body finished successfully
    Completed {
        task: String,
        path: String,
        duration: Duration,
    },
    /// A task body failed
    Failed {
        task: String,
        path: String,
        duration: Duration,
        error: String,
    },
    /// A task was already run (or is running) for this key; its result was reused
    Deduplicated { task: String, path: String },
    /// A task was not run
    Skipped {
        task: String,
        path: String,
        reason: String,
    },
    /// The whole run is finished
    AllCompleted {
        executed: usize,
        deduplicated: usize,
        failed: usize,
        skipped: usize,
        duration: Duration,
    },
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Reporter that logs events through tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { task, path } => {
                tracing::info!(task = %task, path = %path, "task started");
            }
            TaskEvent::Completed {
                task,
                path,
                duration,
            } => {
                tracing::info!(
                    task = %task,
                    path = %path,
                    "task completed in {:.1}s",
                    duration.as_secs_f64()
                );
            }
            TaskEvent::Failed {
                task,
                path,
                duration,
                error,
            } => {
                tracing::error!(
                    task = %task,
                    path = %path,
                    "task failed after {:.1}s: {}",
                    duration.as_secs_f64(),
                    error
                );
            }
            TaskEvent::Deduplicated { task, path } => {
                tracing::debug!(task = %task, path = %path, "task result reused");
            }
            TaskEvent::Skipped { task, path, reason } => {
                tracing::info!(task = %task, path = %path, "task skipped: {}", reason);
            }
            TaskEvent::AllCompleted {
                executed,
                deduplicated,
                failed,
                skipped,
                duration,
            } => {
                tracing::info!(
                    "Run complete: {} executed, {} deduplicated, {} failed, {} skipped ({:.1}s)",
                    executed,
                    deduplicated,
                    failed,
                    skipped,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of `Started` events for `task`
    pub fn started(&self, task: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TaskEvent::Started { task: t, .. } if t == task))
            .count()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Registry of task reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
