//! Prometheus `query_range` client.

use super::MetricsSource;
use crate::clock::format_timestamp;
use crate::config::PrometheusSettings;
use crate::error::Result;
use crate::http::{build_client, ensure_success, join_url, Auth, ClientOptions};
use crate::model::Window;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

const SERVICE: &str = "Prometheus";
const QUERY_RANGE_PATH: &str = "/api/v1/query_range";

pub struct PrometheusSource {
    http: Client,
    url: String,
    auth: Auth,
    query: String,
    step_seconds: u64,
}

impl PrometheusSource {
    pub fn new(settings: &PrometheusSettings) -> Result<Self> {
        let http = build_client(ClientOptions {
            timeout: Duration::from_secs(settings.timeout_secs),
            connect_timeout: None,
            insecure: settings.insecure,
        })?;
        Ok(Self {
            http,
            url: settings.url.clone(),
            auth: Auth::from_settings(None, settings.user.as_deref(), settings.password.as_deref()),
            query: settings.query.clone(),
            step_seconds: settings.query_step_seconds,
        })
    }

    fn query_params(&self, window: Window) -> [(&'static str, String); 4] {
        [
            ("query", self.query.clone()),
            ("start", window.start.to_string()),
            ("end", window.end.to_string()),
            ("step", format!("{}s", self.step_seconds)),
        ]
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn fetch_range(
        &self,
        window: Window,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        info!(
            query = %self.query,
            start = %format_timestamp(window.start),
            end = %format_timestamp(window.end),
            step_seconds = self.step_seconds,
            "Querying range"
        );

        let request = self
            .http
            .get(join_url(&self.url, QUERY_RANGE_PATH))
            .query(&self.query_params(window));
        let response = self.auth.apply(request).send().await?;
        let mut response = ensure_success(response, SERVICE).await?;

        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await? {
            out.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        out.flush().await?;

        debug!(bytes = total, "Spooled range response");
        Ok(total)
    }

    fn describe(&self) -> String {
        format!("prometheus {}", self.url)
    }
}
