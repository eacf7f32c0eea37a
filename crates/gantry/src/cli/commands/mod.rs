//! CLI commands

mod completions;
mod introspect;
mod run;

pub use completions::CompletionsCommand;
pub use introspect::{ListCommand, PlanCommand};
pub use run::{RunCommand, Target};
