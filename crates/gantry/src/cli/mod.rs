//! CLI definition and command handling

pub mod commands;
pub mod output;
mod task_args;
mod workspace;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{CompletionsCommand, ListCommand, PlanCommand, RunCommand, Target};

pub use task_args::{parse_task_args, UsageError};
pub use workspace::Workspace;

/// Gantry - composable task runner for monorepos
#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (echo commands, debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show output of failing tasks
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    /// Configuration file (default: searched upward from the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the execution plan
    Plan(PlanCommand),

    /// List available tasks
    List(ListCommand),

    /// Print a CI matrix of module directories
    Matrix,

    /// Generate shell completions
    Completions(CompletionsCommand),

    /// Run a task by name: gantry <task> [--flag value | --flag=value]...
    #[command(external_subcommand)]
    Task(Vec<String>),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        let target = match &self.command {
            None => Target::Default,
            Some(Commands::Plan(cmd)) => cmd.target(),
            Some(Commands::List(cmd)) => cmd.target(),
            Some(Commands::Matrix) => Target::builtin(gantry_tasks::MATRIX_TASK, []),
            Some(Commands::Completions(cmd)) => return cmd.execute(&self),
            Some(Commands::Task(args)) => Target::named(args),
        };
        RunCommand::new(target).execute(&self)
    }

    /// Verbosity selected by `-v` / `-q`
    pub fn verbosity(&self) -> gantry_tasks::Verbosity {
        if self.verbose {
            gantry_tasks::Verbosity::Verbose
        } else if self.quiet {
            gantry_tasks::Verbosity::Quiet
        } else {
            gantry_tasks::Verbosity::Normal
        }
    }
}

/// Rewrite the single-dash `plan -json` / `plan -all` spellings to their long forms
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut in_plan = false;
    let mut takes_value = false;
    args.into_iter()
        .map(|arg| {
            let was_value = std::mem::replace(
                &mut takes_value,
                matches!(arg.as_str(), "-C" | "-c" | "--directory" | "--config"),
            );
            if in_plan {
                match arg.as_str() {
                    "-json" => return "--json".to_string(),
                    "-all" => return "--all".to_string(),
                    _ => {}
                }
            } else if arg == "plan" && !was_value {
                in_plan = true;
            }
            arg
        })
        .collect()
}
