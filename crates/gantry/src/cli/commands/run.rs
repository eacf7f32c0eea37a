//! Run command: execute the default tree, a named task or a built-in

use std::sync::Arc;

use anyhow::Context;
use console::style;
use tracing::{debug, info};

use gantry_tasks::{
    CancelToken, Execution, Runnable, TaskEvent, TaskOptions, TaskReporter, TaskReporterRegistry,
    TaskSet, TaskError,
};

use crate::cli::{parse_task_args, Cli, UsageError, Workspace};

/// What to run
#[derive(Debug)]
pub enum Target {
    /// The configured default tree
    Default,
    /// A task named on the command line, with its raw flag arguments
    Named { name: String, args: Vec<String> },
    /// A built-in introspection task
    Builtin {
        name: &'static str,
        flags: TaskOptions,
    },
}

impl Target {
    /// Target from the external-subcommand arguments (`<task> [flags...]`)
    pub fn named(args: &[String]) -> Self {
        match args.split_first() {
            Some((name, rest)) => Target::Named {
                name: name.clone(),
                args: rest.to_vec(),
            },
            None => Target::Default,
        }
    }

    pub fn builtin<const N: usize>(name: &'static str, flags: [(&str, bool); N]) -> Self {
        Target::Builtin {
            name,
            flags: flags
                .into_iter()
                .map(|(flag, on)| (flag, on.to_string()))
                .collect(),
        }
    }
}

/// Runs one target inside a loaded workspace
pub struct RunCommand {
    target: Target,
}

impl RunCommand {
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    pub fn execute(self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let workspace = Workspace::load(&cwd, cli.config.as_deref())?;
        let tasks = TaskSet::from_config(&workspace.config)?;

        let selection = select(&tasks, self.target)?;
        info!(selection = %selection.label, root = %workspace.root.display(), "running");

        let mut reporters = TaskReporterRegistry::new();
        if selection.console && !cli.quiet {
            reporters.register(ConsoleReporter::new(cli.verbose));
        }

        let cancel = CancelToken::new();
        let mut builder = Execution::builder(workspace.root.clone())
            .verbosity(cli.verbosity())
            .run_manual(selection.run_manual)
            .grace(workspace.grace())
            .skip_dirs(workspace.skip_dirs())
            .cancel_token(cancel.clone())
            .reporter(Arc::new(reporters));
        if let Some((task, flags)) = selection.flags {
            builder = builder.task_flags(task, flags);
        }
        let execution = builder.build_for(&tasks.plan_roots())?;
        debug!(
            tasks = execution.plan().tasks.len(),
            module_directories = execution.plan().module_directories.len(),
            "plan built"
        );

        let signals = cancel.bind_os_signals();
        let result = execution.run(&selection.runnable).await;
        signals.abort();

        match result {
            Ok(()) => Ok(()),
            Err(_) if cancel.is_cancelled() => Err(TaskError::Cancelled.into()),
            Err(err) => Err(err).with_context(|| format!("{} failed", selection.label)),
        }
    }
}

struct Selection {
    runnable: Runnable,
    label: String,
    run_manual: bool,
    /// Whether progress is reported on the console
    console: bool,
    flags: Option<(String, TaskOptions)>,
}

fn select(tasks: &TaskSet, target: Target) -> Result<Selection, UsageError> {
    match target {
        Target::Default => Ok(Selection {
            runnable: tasks.default_run().clone(),
            label: "default run".to_string(),
            run_manual: false,
            console: true,
            flags: None,
        }),
        Target::Named { name, args } => {
            let (Some(task), Some(runnable)) = (tasks.task(&name), tasks.get(&name)) else {
                return Err(UsageError::UnknownTask(name));
            };
            let flags = parse_task_args(task, &args)?;
            Ok(Selection {
                runnable: runnable.clone(),
                label: format!("task '{}'", name),
                run_manual: true,
                console: true,
                flags: Some((name, flags)),
            })
        }
        Target::Builtin { name, flags } => {
            let runnable = tasks
                .get(name)
                .cloned()
                .ok_or_else(|| UsageError::UnknownTask(name.to_string()))?;
            Ok(Selection {
                runnable,
                label: name.to_string(),
                run_manual: true,
                console: false,
                flags: Some((name.to_string(), flags)),
            })
        }
    }
}

/// Console reporter printing task progress to stderr
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// The line printed for `event`, if any
    fn line(&self, event: &TaskEvent) -> Option<String> {
        match event {
            TaskEvent::Started { task, path } => Some(format!(
                "  {} {}",
                style("▸").dim(),
                style(label(task, path)).bold()
            )),
            TaskEvent::Completed {
                task,
                path,
                duration,
            } => Some(format!(
                "  {} {} {}",
                style("✓").green(),
                style(label(task, path)).green(),
                style(format!("{:.1}s", duration.as_secs_f64())).dim()
            )),
            TaskEvent::Failed {
                task,
                path,
                duration,
                error,
            } => Some(format!(
                "  {} {} {} {}",
                style("✗").red(),
                style(label(task, path)).red(),
                style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                style(error).red().dim()
            )),
            TaskEvent::Deduplicated { task, path } if self.verbose => Some(format!(
                "  {} {} {}",
                style("=").dim(),
                style(label(task, path)).dim(),
                style("(already run)").dim()
            )),
            TaskEvent::Deduplicated { .. } => None,
            TaskEvent::Skipped { task, path, reason } => Some(format!(
                "  {} {} {}",
                style("○").yellow(),
                style(label(task, path)).yellow(),
                style(format!("({})", reason)).dim()
            )),
            TaskEvent::AllCompleted {
                executed,
                deduplicated,
                failed,
                skipped,
                duration,
            } => Some(format!(
                "  {} {} executed, {} deduplicated, {} failed, {} skipped ({:.1}s)",
                if *failed == 0 {
                    style("✓").green().bold()
                } else {
                    style("✗").red().bold()
                },
                executed,
                deduplicated,
                failed,
                skipped,
                duration.as_secs_f64()
            )),
        }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        if let Some(line) = self.line(event) {
            eprintln!("{}", line);
        }
    }
}

fn label(task: &str, path: &str) -> String {
    if path == "." {
        task.to_string()
    } else {
        format!("{} @ {}", task, path)
    }
}
