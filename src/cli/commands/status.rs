use clap::Args;

#[derive(Args)]
pub struct StatusCommand {
    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,
}
