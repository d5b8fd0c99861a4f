//! Configuration management for the promhouse export job.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Default configuration (embedded in the binary)
//! 2. System-wide configuration file (`/etc/promhouse/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables, `PROMHOUSE_<SECTION>__<KEY>`
//!    (e.g. `PROMHOUSE_CLICKHOUSE__URL`, `PROMHOUSE_ETL__WINDOW_SECONDS`)
//! 5. Command-line overrides
//!
//! The settings struct is built once at start-up and handed to each
//! component; nothing reads configuration after that.

use crate::error::{Error, Result};
use crate::planner::{MinStart, WindowPolicy, DEFAULT_OVERLAP_ON_FIRST_RUN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const SYSTEM_CONFIG_PATH: &str = "/etc/promhouse/config.toml";
const ENV_PREFIX: &str = "PROMHOUSE";

/// Default size above which staged rows trigger a warning (256 MiB).
pub const DEFAULT_STAGING_WARN_BYTES: u64 = 256 * 1024 * 1024;

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub prometheus: PrometheusSettings,
    pub clickhouse: ClickHouseSettings,
    /// Only needed when the push gateway holds job state
    #[serde(default)]
    pub pushgateway: Option<PushGatewaySettings>,
    #[serde(default)]
    pub etl: EtlSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Prometheus (or Mimir) range-query endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusSettings {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Disable TLS certificate verification
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Resolution of `query_range`; should match the scrape interval
    #[serde(default = "default_query_step_seconds")]
    pub query_step_seconds: u64,
    /// Series selector exported by each run
    #[serde(default = "default_query")]
    pub query: String,
}

/// ClickHouse HTTP interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseSettings {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Send/receive timeout, sized for large inserts
    #[serde(default = "default_clickhouse_timeout_secs")]
    pub timeout_secs: u64,
    /// Sample table
    pub table: String,
    /// Job state table, used when `etl.state_backend = "clickhouse"`
    #[serde(default = "default_state_table")]
    pub state_table: String,
}

/// Prometheus push gateway holding job state as gauges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushGatewaySettings {
    pub url: String,
    /// Bearer token; takes precedence over basic auth
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub job: String,
    pub instance: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    Clickhouse,
    Pushgateway,
}

/// Windowing and staging behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlSettings {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
    #[serde(default)]
    pub overlap_seconds: i64,
    /// Unix seconds, RFC 3339, or a relative duration such as `7d`
    #[serde(default)]
    pub min_start: Option<String>,
    #[serde(default = "default_overlap_on_first_run")]
    pub overlap_on_first_run: bool,
    #[serde(default = "default_state_backend")]
    pub state_backend: StateBackendKind,
    /// Directory for spooled responses and staged rows; system temp dir if unset
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default = "default_staging_warn_bytes")]
    pub staging_warn_bytes: u64,
}

impl Default for EtlSettings {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            overlap_seconds: 0,
            min_start: None,
            overlap_on_first_run: DEFAULT_OVERLAP_ON_FIRST_RUN,
            state_backend: default_state_backend(),
            temp_dir: None,
            staging_warn_bytes: DEFAULT_STAGING_WARN_BYTES,
        }
    }
}

impl EtlSettings {
    pub fn window_policy(&self) -> Result<WindowPolicy> {
        Ok(WindowPolicy::new(self.window_seconds, self.overlap_seconds)?
            .with_overlap_on_first_run(self.overlap_on_first_run))
    }

    pub fn min_start(&self) -> Result<Option<MinStart>> {
        self.min_start.as_deref().map(str::parse).transpose()
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Extra `EnvFilter` directives, e.g. `promhouse_core=debug,reqwest=warn`
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl LoggingSettings {
    /// Parses `level` (`off`, `error`, `warn`, `info`, `debug`, `trace`).
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level.trim().parse().map_err(|_| {
            Error::Config(format!(
                "logging.level must be one of off, error, warn, info, debug, trace; got {:?}",
                self.level
            ))
        })
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: None,
            format: default_log_format(),
        }
    }
}

/// Backend credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// A configured user with no password authenticates with an empty one.
    pub fn from_parts(user: Option<&str>, password: Option<&str>) -> Option<Self> {
        let username = user.filter(|u| !u.is_empty())?;
        Some(Self {
            username: username.to_string(),
            password: password.unwrap_or_default().to_string(),
        })
    }
}

impl Settings {
    /// Loads settings from all sources. `overrides` are dotted keys such as
    /// `etl.window_seconds` coming from command-line flags.
    pub fn load(config_path: Option<&Path>, overrides: &[(String, String)]) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::with_name(SYSTEM_CONFIG_PATH).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in overrides {
            builder = builder.set_override(key.as_str(), value.as_str())?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Range checks that cannot be expressed in the types.
    pub fn validate(&self) -> Result<()> {
        self.etl.window_policy()?;
        self.etl.min_start()?;
        self.logging.level_filter()?;

        require_url("prometheus.url", &self.prometheus.url)?;
        if self.prometheus.query_step_seconds == 0 {
            return Err(Error::Config("prometheus.query_step_seconds must be positive".into()));
        }
        if self.prometheus.query.trim().is_empty() {
            return Err(Error::Config("prometheus.query must not be empty".into()));
        }

        require_url("clickhouse.url", &self.clickhouse.url)?;
        require_identifier("clickhouse.table", &self.clickhouse.table)?;
        require_identifier("clickhouse.state_table", &self.clickhouse.state_table)?;

        match (self.etl.state_backend, &self.pushgateway) {
            (StateBackendKind::Pushgateway, None) => {
                return Err(Error::Config(
                    "etl.state_backend = \"pushgateway\" requires a [pushgateway] section".into(),
                ))
            }
            (_, Some(gateway)) => {
                require_url("pushgateway.url", &gateway.url)?;
                require_path_segment("pushgateway.job", &gateway.job)?;
                require_path_segment("pushgateway.instance", &gateway.instance)?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn require_url(name: &str, value: &str) -> Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be an http(s) URL, got {:?}", name, value)))
    }
}

/// Table names end up in SQL text, so only plain (optionally qualified)
/// identifiers are accepted.
fn require_identifier(name: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.split('.').all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        });
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("{} is not a valid table name: {:?}", name, value)))
    }
}

fn require_path_segment(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        Err(Error::Config(format!("{} must be a non-empty name without '/'", name)))
    } else {
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_clickhouse_timeout_secs() -> u64 {
    300
}

fn default_query_step_seconds() -> u64 {
    15
}

fn default_query() -> String {
    r#"{__name__=~".+"}"#.to_string()
}

fn default_state_table() -> String {
    "etl_state".to_string()
}

fn default_window_seconds() -> i64 {
    300
}

fn default_overlap_on_first_run() -> bool {
    DEFAULT_OVERLAP_ON_FIRST_RUN
}

fn default_state_backend() -> StateBackendKind {
    StateBackendKind::Clickhouse
}

fn default_staging_warn_bytes() -> u64 {
    DEFAULT_STAGING_WARN_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}
