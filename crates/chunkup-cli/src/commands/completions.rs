//! Shell completions generation.

use std::io;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{generate, Shell};

use super::{Cli, CompletionsAction, ShellType};

impl From<ShellType> for Shell {
    fn from(shell: ShellType) -> Self {
        match shell {
            ShellType::Bash => Self::Bash,
            ShellType::Zsh => Self::Zsh,
            ShellType::Fish => Self::Fish,
            ShellType::PowerShell => Self::PowerShell,
            ShellType::Elvish => Self::Elvish,
        }
    }
}

/// Run the completions command.
pub fn run(action: CompletionsAction) -> Result<()> {
    match action {
        CompletionsAction::Generate { shell } => {
            generate_to(shell, &mut io::stdout());
            Ok(())
        }
    }
}

fn generate_to(shell: ShellType, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    generate(Shell::from(shell), &mut cmd, "chunkup", out);
}
