//! Job state kept as gauges in a Prometheus push gateway.
//!
//! The record lives in the metric group `job/<job>/instance/<instance>`, one
//! gauge per present field (`etl_timestamp_progress`, `etl_timestamp_start`,
//! ...). Writes use `PUT`, which replaces the whole group, so fields absent
//! from a record disappear from the gateway as well.

use super::StateStore;
use crate::config::PushGatewaySettings;
use crate::error::{Error, Result};
use crate::http::{build_client, ensure_success, join_url, Auth, ClientOptions};
use crate::model::JobState;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;

const SERVICE: &str = "PushGateway";
const METRIC_PREFIX: &str = "etl_";

pub struct PushGatewayStateStore {
    http: Client,
    url: String,
    auth: Auth,
    job: String,
    instance: String,
}

impl PushGatewayStateStore {
    pub fn new(settings: &PushGatewaySettings) -> Result<Self> {
        let http = build_client(ClientOptions {
            timeout: Duration::from_secs(settings.timeout_secs),
            connect_timeout: None,
            insecure: settings.insecure,
        })?;
        Ok(Self {
            http,
            url: settings.url.clone(),
            auth: Auth::from_settings(
                settings.token.as_deref(),
                settings.user.as_deref(),
                settings.password.as_deref(),
            ),
            job: settings.job.clone(),
            instance: settings.instance.clone(),
        })
    }

    fn group_url(&self) -> String {
        join_url(
            &self.url,
            &format!("/metrics/job/{}/instance/{}", self.job, self.instance),
        )
    }
}

/// Renders the present fields in the text exposition format.
pub fn render_state(state: &JobState) -> String {
    let fields: [(&str, Option<i128>); 6] = [
        ("timestamp_progress", state.timestamp_progress.map(i128::from)),
        ("timestamp_start", state.timestamp_start.map(i128::from)),
        ("timestamp_end", state.timestamp_end.map(i128::from)),
        ("batch_window_seconds", state.batch_window_seconds.map(i128::from)),
        ("batch_rows", state.batch_rows.map(i128::from)),
        ("batch_skipped_count", state.batch_skipped_count.map(i128::from)),
    ];

    let mut body = String::new();
    for (field, value) in fields {
        if let Some(value) = value {
            let _ = writeln!(body, "# TYPE {}{} gauge", METRIC_PREFIX, field);
            let _ = writeln!(body, "{}{} {}", METRIC_PREFIX, field, value);
        }
    }
    body
}

/// Extracts the record of one job/instance group from the gateway's
/// `/api/v1/metrics` response.
pub fn parse_state(response: &Value, job: &str, instance: &str) -> Result<Option<JobState>> {
    let groups = response
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidResponse(format!("{} response has no data array", SERVICE)))?;

    let group = groups.iter().find(|group| {
        let labels = group.get("labels");
        let label = |name: &str| labels.and_then(|l| l.get(name)).and_then(Value::as_str);
        label("job") == Some(job) && label("instance") == Some(instance)
    });
    let group = match group {
        Some(group) => group,
        None => return Ok(None),
    };

    let gauge = |field: &str| -> Result<Option<f64>> {
        let metric = match group.get(format!("{}{}", METRIC_PREFIX, field)) {
            Some(metric) => metric,
            None => return Ok(None),
        };
        let value = metric
            .get("metrics")
            .and_then(Value::as_array)
            .and_then(|samples| samples.first())
            .and_then(|sample| sample.get("value"))
            .and_then(Value::as_str);
        match value {
            Some(text) => text.parse::<f64>().map(Some).map_err(|_| {
                Error::InvalidResponse(format!("{} gauge {} has value {:?}", SERVICE, field, text))
            }),
            None => Ok(None),
        }
    };

    Ok(Some(JobState {
        timestamp_progress: gauge("timestamp_progress")?.map(|v| v as i64),
        timestamp_start: gauge("timestamp_start")?.map(|v| v as i64),
        timestamp_end: gauge("timestamp_end")?.map(|v| v as i64),
        batch_window_seconds: gauge("batch_window_seconds")?.map(|v| v as i64),
        batch_rows: gauge("batch_rows")?.map(|v| v as u64),
        batch_skipped_count: gauge("batch_skipped_count")?.map(|v| v as u64),
    }))
}

#[async_trait]
impl StateStore for PushGatewayStateStore {
    async fn read_state(&self) -> Result<Option<JobState>> {
        let request = self.http.get(join_url(&self.url, "/api/v1/metrics"));
        let response = self.auth.apply(request).send().await?;
        let body: Value = ensure_success(response, SERVICE).await?.json().await?;
        parse_state(&body, &self.job, &self.instance)
    }

    async fn write_state(&self, state: &JobState) -> Result<()> {
        let request = self
            .http
            .put(self.group_url())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(render_state(state));
        let response = self.auth.apply(request).send().await?;
        ensure_success(response, SERVICE).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("pushgateway job={} instance={}", self.job, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_skips_absent_fields() {
        let state = JobState {
            timestamp_progress: Some(1700000000),
            timestamp_start: Some(1700000500),
            ..JobState::default()
        };
        assert_eq!(
            render_state(&state),
            "# TYPE etl_timestamp_progress gauge\netl_timestamp_progress 1700000000\n\
             # TYPE etl_timestamp_start gauge\netl_timestamp_start 1700000500\n"
        );
    }

    #[test]
    fn test_parse_matching_group() {
        let gauge = |v: &str| json!({"type": "GAUGE", "metrics": [{"labels": {}, "value": v}]});
        let response = json!({
            "status": "success",
            "data": [
                {"labels": {"job": "other", "instance": "x"}, "etl_timestamp_progress": gauge("1")},
                {
                    "labels": {"job": "etl", "instance": "main"},
                    "etl_timestamp_progress": gauge("1.7e+09"),
                    "etl_timestamp_start": gauge("1700000500"),
                    "etl_batch_rows": gauge("12"),
                    "push_time_seconds": gauge("1700000501.2")
                }
            ]
        });

        let state = parse_state(&response, "etl", "main").unwrap().unwrap();
        assert_eq!(state.timestamp_progress, Some(1700000000));
        assert_eq!(state.timestamp_start, Some(1700000500));
        assert_eq!(state.timestamp_end, None);
        assert_eq!(state.batch_rows, Some(12));
        assert!(state.is_running());

        assert_eq!(parse_state(&response, "etl", "other").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_state(&json!({"status": "success"}), "a", "b").is_err());
        let response = json!({"data": [{
            "labels": {"job": "a", "instance": "b"},
            "etl_timestamp_end": {"metrics": [{"value": "soon"}]}
        }]});
        assert!(parse_state(&response, "a", "b").is_err());
    }
}
