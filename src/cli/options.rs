use crate::cli::commands::Commands;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Exports Prometheus range data into ClickHouse", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true, env = "PROMHOUSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_name = "FORMAT", value_parser = ["text", "json"], global = true)]
    pub log_format: Option<String>,
}

impl Cli {
    /// Settings overrides carried by the global flags, as dotted keys.
    pub fn overrides(&self) -> Vec<(String, String)> {
        let mut overrides = Vec::new();
        match self.verbose {
            0 => {}
            1 => overrides.push(("logging.level".to_string(), "debug".to_string())),
            _ => overrides.push(("logging.level".to_string(), "trace".to_string())),
        }
        if let Some(format) = &self.log_format {
            overrides.push(("logging.format".to_string(), format.clone()));
        }
        overrides.extend(self.command.overrides());
        overrides
    }
}
