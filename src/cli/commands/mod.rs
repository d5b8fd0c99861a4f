pub mod run;
pub mod seed;
pub mod status;

pub use run::RunCommand;
pub use seed::SeedCommand;
pub use status::StatusCommand;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Export the next complete window
    Run(RunCommand),
    /// Show the job state
    Status(StatusCommand),
    /// Set the progress mark, initialising the job or clearing a stuck run
    Seed(SeedCommand),
}

impl Commands {
    pub fn overrides(&self) -> Vec<(String, String)> {
        match self {
            Commands::Run(cmd) => cmd.overrides(),
            Commands::Status(_) | Commands::Seed(_) => Vec::new(),
        }
    }
}
