//! Where samples come from.

pub mod prometheus;

use crate::error::{Error, Result};
use crate::model::Window;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub use self::prometheus::PrometheusSource;

/// A range-query backend.
///
/// Implementations copy the raw response body for `window` into `out` as it
/// arrives and return the number of bytes copied. The body is parsed later
/// by [`crate::transform::RowStream`].
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_range(
        &self,
        window: Window,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;

    fn describe(&self) -> String;
}

/// Serves a fixed response body for every window.
pub struct StaticSource {
    body: Mutex<Vec<u8>>,
    requests: Mutex<Vec<Window>>,
    fail: Mutex<Option<String>>,
}

impl StaticSource {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: Mutex::new(body.into()),
            requests: Mutex::new(Vec::new()),
            fail: Mutex::new(None),
        }
    }

    pub fn set_body(&self, body: impl Into<Vec<u8>>) {
        if let Ok(mut current) = self.body.lock() {
            *current = body.into();
        }
    }

    /// Makes every following fetch fail with a transport error.
    pub fn fail_with(&self, message: Option<&str>) {
        if let Ok(mut fail) = self.fail.lock() {
            *fail = message.map(str::to_string);
        }
    }

    /// Windows requested so far.
    pub fn requests(&self) -> Vec<Window> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetricsSource for StaticSource {
    async fn fetch_range(
        &self,
        window: Window,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        self.requests.lock().map_err(poisoned)?.push(window);
        let failure = self.fail.lock().map_err(poisoned)?.clone();
        if let Some(message) = failure {
            return Err(Error::Transport(message));
        }

        let body = self.body.lock().map_err(poisoned)?.clone();
        out.write_all(&body).await?;
        out.flush().await?;
        Ok(body.len() as u64)
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("static source lock poisoned".to_string())
}
