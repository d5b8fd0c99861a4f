//! Value types shared by every stage of the export pipeline.
//!
//! - [`Row`]: one flattened sample ready for insertion
//! - [`SampleValue`]: a sample value with its canonical decimal rendering
//! - [`Window`]: the half-open `[start, end)` range handled by one run
//! - [`JobState`]: the persisted progress and lock record

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Label set of a series, `__name__` excluded. Ordered so that its JSON
/// rendering is canonical.
pub type Labels = BTreeMap<String, String>;

/// Column names of the sample table, in insertion order.
pub const ROW_COLUMNS: [&str; 4] = ["timestamp", "metric_name", "labels", "value"];

/// A numeric sample value.
///
/// The backend reports values as decimal strings. They are parsed as exact
/// decimals and rendered back in plain positional notation, so a value never
/// reaches the sink in exponent form or with float formatting noise.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleValue {
    value: f64,
    canonical: String,
}

impl SampleValue {
    /// Parses a backend value. Returns `None` for anything that is not a
    /// finite number, which includes the `NaN` stale marker and `±Inf`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let exact = Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text));
        if let Ok(decimal) = exact {
            let decimal = decimal.normalize();
            return Some(Self {
                value: decimal.to_f64()?,
                canonical: decimal.to_string(),
            });
        }

        // Outside the decimal range (|v| > ~7.9e28 or more than 28 fractional
        // digits). f64's Display never switches to exponent notation.
        let value: f64 = text.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(Self {
            value,
            canonical: value.to_string(),
        })
    }

    pub fn as_f64(&self) -> f64 {
        self.value
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// One sample of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Unix timestamp, whole seconds
    pub timestamp: i64,
    pub metric_name: String,
    pub labels: Labels,
    pub value: SampleValue,
}

impl Row {
    /// Canonical JSON rendering of the label set: sorted keys, no whitespace.
    pub fn labels_json(&self) -> String {
        canonical_labels(&self.labels)
    }

    /// The key the sink deduplicates on.
    pub fn dedup_key(&self) -> (i64, String, String) {
        (self.timestamp, self.metric_name.clone(), self.labels_json())
    }
}

pub fn canonical_labels(labels: &Labels) -> String {
    // BTreeMap<String, String> serialization cannot fail.
    serde_json::to_string(labels).unwrap_or_else(|_| "{}".to_string())
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = RawValue::from_string(self.value.canonical.clone()).map_err(S::Error::custom)?;
        let mut row = serializer.serialize_struct("Row", 4)?;
        row.serialize_field("timestamp", &self.timestamp)?;
        row.serialize_field("metric_name", &self.metric_name)?;
        row.serialize_field("labels", &self.labels_json())?;
        row.serialize_field("value", &value)?;
        row.end()
    }
}

/// Half-open time range `[start, end)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn len_seconds(&self) -> i64 {
        self.end - self.start
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Lock state derived from a [`JobState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run in flight; a new one may start.
    Idle,
    /// A run has started and not completed, or crashed before completing.
    Running,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
        }
    }
}

/// Persisted job record. All fields are nullable in the backing store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    #[serde(default)]
    pub timestamp_progress: Option<i64>,
    #[serde(default)]
    pub timestamp_start: Option<i64>,
    #[serde(default)]
    pub timestamp_end: Option<i64>,
    #[serde(default)]
    pub batch_window_seconds: Option<i64>,
    #[serde(default)]
    pub batch_rows: Option<u64>,
    #[serde(default)]
    pub batch_skipped_count: Option<u64>,
}

impl JobState {
    /// An idle record carrying only a progress mark, as written by an operator
    /// before the first run.
    pub fn seeded(progress: i64, now: i64) -> Self {
        Self {
            timestamp_progress: Some(progress),
            timestamp_start: Some(now),
            timestamp_end: Some(now),
            ..Self::default()
        }
    }

    pub fn phase(&self) -> Phase {
        match (self.timestamp_start, self.timestamp_end) {
            (Some(start), Some(end)) if end >= start => Phase::Idle,
            (Some(_), _) => Phase::Running,
            (None, _) => Phase::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// True once at least one run has committed batch metadata.
    pub fn has_completed_batch(&self) -> bool {
        self.batch_window_seconds.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_value_canonical_rendering() {
        let cases = [
            ("1", "1"),
            ("1.50", "1.5"),
            ("-0.25", "-0.25"),
            ("1e+06", "1000000"),
            ("1.5e-07", "0.00000015"),
            ("0.1", "0.1"),
            ("123456789.123456789", "123456789.123456789"),
        ];
        for (input, expected) in cases {
            let value = SampleValue::parse(input).unwrap();
            assert_eq!(value.canonical(), expected, "input {}", input);
        }
    }

    #[test]
    fn test_sample_value_out_of_decimal_range() {
        let value = SampleValue::parse("1e+30").unwrap();
        assert!(!value.canonical().contains('e'));
        assert_eq!(value.as_f64(), 1e30);
    }

    #[test]
    fn test_sample_value_rejects_sentinels() {
        for input in ["NaN", "+Inf", "-Inf", "", "stale", "1.2.3"] {
            assert!(SampleValue::parse(input).is_none(), "input {}", input);
        }
    }

    #[test]
    fn test_row_serialization() {
        let mut labels = Labels::new();
        labels.insert("job".to_string(), "node".to_string());
        labels.insert("instance".to_string(), "a:9100".to_string());
        let row = Row {
            timestamp: 1700000000,
            metric_name: "up".to_string(),
            labels,
            value: SampleValue::parse("1e+06").unwrap(),
        };

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":1700000000,"metric_name":"up","labels":"{\"instance\":\"a:9100\",\"job\":\"node\"}","value":1000000}"#
        );
    }

    #[test]
    fn test_job_state_phase() {
        assert_eq!(JobState::default().phase(), Phase::Idle);

        let running = JobState {
            timestamp_progress: Some(100),
            timestamp_start: Some(200),
            ..JobState::default()
        };
        assert_eq!(running.phase(), Phase::Running);

        let restarted = JobState {
            timestamp_start: Some(300),
            timestamp_end: Some(250),
            ..JobState::default()
        };
        assert_eq!(restarted.phase(), Phase::Running);

        let done = JobState {
            timestamp_start: Some(300),
            timestamp_end: Some(301),
            ..JobState::default()
        };
        assert_eq!(done.phase(), Phase::Idle);
    }

    #[test]
    fn test_seeded_state_is_idle_without_batch() {
        let state = JobState::seeded(1700000000, 1700000500);
        assert_eq!(state.phase(), Phase::Idle);
        assert!(!state.has_completed_batch());
        assert_eq!(state.timestamp_progress, Some(1700000000));
    }

    #[test]
    fn test_job_state_deserializes_nulls() {
        let state: JobState = serde_json::from_str(
            r#"{"timestamp_progress":10,"timestamp_start":20,"timestamp_end":null,"batch_window_seconds":null,"batch_rows":null,"batch_skipped_count":null}"#,
        )
        .unwrap();
        assert_eq!(state.timestamp_progress, Some(10));
        assert!(state.is_running());
    }
}
