use clap::Args;

#[derive(Args)]
pub struct RunCommand {
    /// Window size in seconds
    #[arg(long, value_name = "SECONDS")]
    pub window_seconds: Option<i64>,

    /// Seconds re-read from the end of the previous window
    #[arg(long, value_name = "SECONDS")]
    pub overlap_seconds: Option<i64>,

    /// Earliest window start: unix seconds, RFC 3339 or a relative age such as 7d
    #[arg(long, value_name = "WHEN")]
    pub min_start: Option<String>,

    /// Directory for spooled responses and staged rows
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<std::path::PathBuf>,
}

impl RunCommand {
    pub fn overrides(&self) -> Vec<(String, String)> {
        let mut overrides = Vec::new();
        if let Some(window) = self.window_seconds {
            overrides.push(("etl.window_seconds".to_string(), window.to_string()));
        }
        if let Some(overlap) = self.overlap_seconds {
            overrides.push(("etl.overlap_seconds".to_string(), overlap.to_string()));
        }
        if let Some(min_start) = &self.min_start {
            overrides.push(("etl.min_start".to_string(), min_start.clone()));
        }
        if let Some(dir) = &self.temp_dir {
            overrides.push(("etl.temp_dir".to_string(), dir.display().to_string()));
        }
        overrides
    }
}
