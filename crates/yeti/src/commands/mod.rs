pub mod big;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle bigfiles
    Big {
        #[command(subcommand)]
        command: big::BigCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Big { command } => command.handle(),
        }
    }
}
