//! Shell completions generation command

use std::io;

use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};
use tracing::info;

use crate::cli::Cli;

/// Generate shell completions
#[derive(Debug, Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output to file instead of stdout
    #[arg(short, long)]
    pub output: Option<std::path::PathBuf>,
}

impl CompletionsCommand {
    /// Execute the completions command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(shell = %self.shell, "executing completions command");

        if let Some(ref output_path) = self.output {
            let mut file = std::fs::File::create(output_path)?;
            self.write(&mut file);

            if !cli.quiet {
                println!("Completions written to {}", output_path.display());
            }
        } else {
            self.write(&mut io::stdout());
        }

        Ok(())
    }

    fn write(&self, out: &mut dyn io::Write) {
        let mut cmd = Cli::command();
        generate(self.shell, &mut cmd, "gantry", out);
    }
}
