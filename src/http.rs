//! Shared HTTP plumbing for the Prometheus, ClickHouse and push gateway clients.

use crate::config::Credentials;
use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

/// Longest response body excerpt carried in transport errors.
pub const RESPONSE_PREVIEW_CHARS: usize = 1000;

/// How a client authenticates. A bearer token wins over basic auth.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Basic(Credentials),
    Bearer(String),
}

impl Auth {
    pub fn from_settings(token: Option<&str>, user: Option<&str>, password: Option<&str>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            return Auth::Bearer(token.to_string());
        }
        match Credentials::from_parts(user, password) {
            Some(credentials) => Auth::Basic(credentials),
            None => Auth::None,
        }
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::None => request,
            Auth::Basic(c) => request.basic_auth(&c.username, Some(&c.password)),
            Auth::Bearer(token) => request.bearer_auth(token),
        }
    }
}

pub struct ClientOptions {
    pub timeout: Duration,
    pub connect_timeout: Option<Duration>,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

pub fn build_client(options: ClientOptions) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(options.timeout)
        .danger_accept_invalid_certs(options.insecure)
        .user_agent(concat!("promhouse/", env!("CARGO_PKG_VERSION")));
    if let Some(connect_timeout) = options.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Passes successful responses through; anything else becomes a transport
/// error carrying a short excerpt of the body.
pub async fn ensure_success(response: Response, service: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let preview: String = body.chars().take(RESPONSE_PREVIEW_CHARS).collect();

    tracing::error!(
        service,
        status = status.as_u16(),
        url = %url,
        response_preview = %preview,
        "Request failed"
    );
    Err(Error::Transport(format!(
        "{} returned {} for {}: {}",
        service, status, url, preview
    )))
}

/// Joins a base URL and a path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://p:9090/", "/api/v1/query_range"), "http://p:9090/api/v1/query_range");
        assert_eq!(join_url("http://p:9090", "api/v1/query"), "http://p:9090/api/v1/query");
    }

    #[test]
    fn test_token_wins_over_basic_auth() {
        let auth = Auth::from_settings(Some("abc"), Some("user"), Some("pw"));
        assert!(matches!(auth, Auth::Bearer(ref t) if t == "abc"));

        let auth = Auth::from_settings(None, Some("user"), None);
        assert!(matches!(auth, Auth::Basic(ref c) if c.username == "user" && c.password.is_empty()));

        assert!(matches!(Auth::from_settings(Some(""), None, None), Auth::None));
    }
}
