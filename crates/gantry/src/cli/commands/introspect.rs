//! Plan and task listing commands

use clap::Args;
use gantry_tasks::{LIST_TASK, PLAN_TASK};

use super::Target;

/// Show the execution plan
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Print the plan as JSON (includes hidden tasks)
    #[arg(long)]
    pub json: bool,

    /// Include hidden tasks in the text listing
    #[arg(long)]
    pub all: bool,
}

impl PlanCommand {
    pub fn target(&self) -> Target {
        Target::builtin(PLAN_TASK, [("json", self.json), ("all", self.all)])
    }
}

/// List available tasks
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Include hidden tasks
    #[arg(long)]
    pub all: bool,
}

impl ListCommand {
    pub fn target(&self) -> Target {
        Target::builtin(LIST_TASK, [("all", self.all)])
    }
}
