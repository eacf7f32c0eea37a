//! Built-in introspection tasks
//!
//! These tasks only read the plan from their context; they never touch the
//! filesystem or run processes.

use std::sync::Arc;

use crate::context::RunContext;
use crate::error::TaskError;
use crate::runnable::Runnable;
use crate::task::Task;

pub const PLAN_TASK: &str = "plan";
pub const LIST_TASK: &str = "list";
pub const MATRIX_TASK: &str = "matrix";

/// Dump the plan as text, or as JSON with `--json`
pub fn plan_task() -> Task {
    Task::new(PLAN_TASK, Runnable::leaf("print plan", print_plan))
        .usage("Show the execution plan")
        .flag("json", "false", "Print the plan as JSON")
        .flag("all", "false", "Include hidden tasks")
        .hidden(true)
        .global(true)
}

/// One line per task with its usage
pub fn list_task() -> Task {
    Task::new(LIST_TASK, Runnable::leaf("list tasks", list_tasks))
        .usage("List available tasks")
        .flag("all", "false", "Include hidden tasks")
        .hidden(true)
        .global(true)
}

/// CI matrix of module directories as JSON
pub fn matrix_task() -> Task {
    Task::new(MATRIX_TASK, Runnable::leaf("print matrix", print_matrix))
        .usage("Print a CI matrix of module directories")
        .hidden(true)
        .global(true)
}

/// Every built-in task
pub fn builtin_tasks() -> Vec<Arc<Task>> {
    vec![
        Arc::new(plan_task()),
        Arc::new(list_task()),
        Arc::new(matrix_task()),
    ]
}

async fn print_plan(ctx: RunContext) -> Result<(), TaskError> {
    let plan = ctx.plan();
    if ctx.options().get_bool("json") {
        let json = plan
            .to_json()
            .map_err(|e| TaskError::failed(format!("failed to serialize plan: {}", e)))?;
        ctx.output().println(json)?;
    } else {
        ctx.out()
            .write_all(plan.render_text(ctx.options().get_bool("all")).as_bytes())?;
    }
    Ok(())
}

async fn list_tasks(ctx: RunContext) -> Result<(), TaskError> {
    let show_all = ctx.options().get_bool("all");
    let tasks: Vec<_> = ctx
        .plan()
        .tasks
        .iter()
        .filter(|t| show_all || !t.hidden)
        .collect();
    let width = tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);

    let mut text = String::new();
    for task in tasks {
        let line = format!("{:<width$}  {}", task.name, task.usage, width = width);
        text.push_str(line.trim_end());
        text.push('\n');
    }
    ctx.out().write_all(text.as_bytes())?;
    Ok(())
}

async fn print_matrix(ctx: RunContext) -> Result<(), TaskError> {
    ctx.output().println(ctx.plan().matrix().to_string())?;
    Ok(())
}
