//! Minimal ClickHouse HTTP interface client.
//!
//! Only the two statement shapes the job needs: `INSERT ... FORMAT
//! JSONEachRow` with a streamed body, and `SELECT ... FORMAT JSONEachRow`
//! decoded line by line.

use crate::config::ClickHouseSettings;
use crate::error::{Error, Result};
use crate::http::{build_client, ensure_success, Auth, ClientOptions};
use reqwest::{Body, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "ClickHouse";

#[derive(Clone)]
pub struct ClickHouseClient {
    http: Client,
    url: String,
    auth: Auth,
    database: Option<String>,
}

impl ClickHouseClient {
    pub fn new(settings: &ClickHouseSettings) -> Result<Self> {
        let http = build_client(ClientOptions {
            timeout: Duration::from_secs(settings.timeout_secs),
            connect_timeout: Some(Duration::from_secs(settings.connect_timeout_secs)),
            insecure: settings.insecure,
        })?;
        Ok(Self {
            http,
            url: settings.url.clone(),
            auth: Auth::from_settings(None, settings.user.as_deref(), settings.password.as_deref()),
            database: settings.database.clone().filter(|d| !d.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, query: &str) -> RequestBuilder {
        let mut params = vec![
            ("query", query.to_string()),
            ("output_format_json_quote_64bit_integers", "0".to_string()),
        ];
        if let Some(database) = &self.database {
            params.push(("database", database.clone()));
        }
        self.auth.apply(self.http.post(&self.url).query(&params))
    }

    /// Inserts newline-delimited JSON objects carrying exactly `columns`.
    pub async fn insert_json_each_row(
        &self,
        table: &str,
        columns: &[&str],
        body: impl Into<Body>,
    ) -> Result<()> {
        let query = insert_statement(table, columns);
        debug!(%query, "Sending insert");
        let response = self.request(&query).body(body).send().await?;
        ensure_success(response, SERVICE).await?;
        Ok(())
    }

    /// Runs a `SELECT` and decodes each returned row. `FORMAT JSONEachRow`
    /// is appended to the statement.
    pub async fn select_json_each_row<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let query = format!("{} FORMAT JSONEachRow", sql.trim_end());
        debug!(%query, "Sending select");
        let response = self.request(&query).send().await?;
        let body = ensure_success(response, SERVICE).await?.text().await?;

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    Error::InvalidResponse(format!("undecodable {} row {:?}: {}", SERVICE, line, e))
                })
            })
            .collect()
    }
}

pub fn insert_statement(table: &str, columns: &[&str]) -> String {
    format!("INSERT INTO {} ({}) FORMAT JSONEachRow", table, columns.join(", "))
}
