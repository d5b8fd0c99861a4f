use crate::cli::commands::{Commands, SeedCommand, StatusCommand};
use crate::cli::options::Cli;
use crate::clickhouse::ClickHouseClient;
use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::config::{LogFormat, LoggingSettings, Settings};
use crate::job::{build_state_store, EtlJob, RunSummary};
use crate::planner::MinStart;
use crate::state::JobLock;
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Loads settings, sets up logging and runs the selected command.
/// Returns the process exit code.
pub async fn execute(cli: Cli) -> Result<i32> {
    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;
    init_logging(&settings.logging)?;

    match &cli.command {
        Commands::Run(_) => handle_run(&settings).await,
        Commands::Status(cmd) => handle_status(&settings, cmd).await,
        Commands::Seed(cmd) => handle_seed(&settings, cmd).await,
    }
}

/// Installs the global subscriber. ERROR records go to stderr, everything
/// else to stdout.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let level = settings.level_filter()?;
    let builder = EnvFilter::builder().with_default_directive(level.into());
    let filter = match settings.filter.as_deref() {
        Some(directives) => builder.parse_lossy(directives),
        None => builder.from_env_lossy(),
    };

    let writer = std::io::stderr
        .with_max_level(tracing::Level::ERROR)
        .or_else(std::io::stdout);

    let installed = match settings.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_timer(ChronoUtc::rfc_3339())
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(false)
            .try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

pub async fn handle_run(settings: &Settings) -> Result<i32> {
    let job = EtlJob::from_settings(settings).context("Failed to set up export job")?;
    info!(
        window_seconds = settings.etl.window_seconds,
        overlap_seconds = settings.etl.overlap_seconds,
        state_backend = ?settings.etl.state_backend,
        "Starting export run"
    );

    let result = job.run().await;
    RunSummary::from_result(&result).log();
    Ok(match &result {
        Ok(outcome) => outcome.exit_code(),
        Err(failure) => failure.exit_code(),
    })
}

fn job_lock(settings: &Settings) -> Result<JobLock> {
    let clickhouse = ClickHouseClient::new(&settings.clickhouse)?;
    let store = build_state_store(settings, &clickhouse)?;
    Ok(JobLock::new(store, Arc::new(SystemClock)))
}

pub async fn handle_status(settings: &Settings, cmd: &StatusCommand) -> Result<i32> {
    let lock = job_lock(settings)?;
    let state = lock.current().await.context("Failed to read job state")?;

    let report = json!({
        "store": lock.store().describe(),
        "phase": state.phase().as_str(),
        "progress_utc": state.timestamp_progress.map(format_timestamp),
        "state": state,
    });
    let rendered = if cmd.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", rendered);
    Ok(0)
}

pub async fn handle_seed(settings: &Settings, cmd: &SeedCommand) -> Result<i32> {
    let progress = cmd
        .progress
        .parse::<MinStart>()
        .context("Invalid --progress value")?
        .resolve(SystemClock.now());

    let lock = job_lock(settings)?;
    let state = lock
        .seed(progress, cmd.force)
        .await
        .context("Failed to seed job state")?;
    println!("{}", serde_json::to_string(&state)?);
    Ok(0)
}
