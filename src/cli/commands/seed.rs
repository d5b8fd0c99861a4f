use clap::Args;

#[derive(Args)]
pub struct SeedCommand {
    /// New progress mark: unix seconds, RFC 3339, or a relative age such as 7d
    #[arg(long, value_name = "WHEN")]
    pub progress: String,

    /// Overwrite the state even if a run appears to be in progress
    #[arg(long)]
    pub force: bool,
}
