//! Flattens a range-query response into [`Row`]s.
//!
//! [`RowStream`] walks the JSON events of a response shaped like
//!
//! ```text
//! {"status": "success",
//!  "data": {"resultType": "matrix",
//!           "result": [{"metric": {"__name__": "up", "job": "node"},
//!                       "values": [[1700000000, "1"], ...]}, ...]}}
//! ```
//!
//! keeping only an explicit stack of scopes and the labels of the series
//! currently open. Rows are produced one at a time as their sample pairs
//! close. Pairs that cannot be read are counted and skipped.

use super::events::{Event, JsonEvents};
use crate::error::{Error, Result};
use crate::model::{Labels, Row, SampleValue};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::io::BufRead;
use std::str::FromStr;
use tracing::debug;

const NAME_LABEL: &str = "__name__";

/// Where in the response document the reader currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Root,
    Data,
    Result,
    Series,
    Metric,
    Values,
    Pair,
    /// Any container the transformer has no use for.
    Ignored,
}

/// Labels of the open series plus samples read before its `metric` object.
#[derive(Debug, Default)]
struct SeriesContext {
    metric_name: String,
    labels: Labels,
    labels_complete: bool,
    deferred: Vec<(i64, SampleValue)>,
}

impl SeriesContext {
    fn row(&self, timestamp: i64, value: SampleValue) -> Row {
        Row {
            timestamp,
            metric_name: self.metric_name.clone(),
            labels: self.labels.clone(),
            value,
        }
    }
}

/// One element of a sample pair.
#[derive(Debug)]
enum PairItem {
    Text(String),
    Other,
}

/// Counters kept while transforming.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransformStats {
    pub series: u64,
    pub rows: u64,
    pub skipped: u64,
}

pub struct RowStream<R> {
    events: JsonEvents<R>,
    scopes: Vec<Scope>,
    pending_key: Option<String>,
    series: Option<SeriesContext>,
    pair: Vec<PairItem>,
    ready: VecDeque<Row>,
    status: Option<String>,
    error_type: Option<String>,
    error_message: Option<String>,
    result_type: Option<String>,
    saw_result: bool,
    stats: TransformStats,
    finished: bool,
}

impl<R: BufRead> RowStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            events: JsonEvents::new(reader),
            scopes: Vec::new(),
            pending_key: None,
            series: None,
            pair: Vec::with_capacity(2),
            ready: VecDeque::new(),
            status: None,
            error_type: None,
            error_message: None,
            result_type: None,
            saw_result: false,
            stats: TransformStats::default(),
            finished: false,
        }
    }

    pub fn stats(&self) -> TransformStats {
        self.stats
    }

    pub fn into_stats(self) -> TransformStats {
        self.stats
    }

    fn child_scope(&self, key: Option<&str>, object: bool) -> Result<Scope> {
        let scope = match (self.scopes.last(), key, object) {
            (None, _, true) => Scope::Root,
            (None, _, false) => {
                return Err(Error::InvalidResponse(
                    "response is not a JSON object".to_string(),
                ))
            }
            (Some(Scope::Root), Some("data"), true) => Scope::Data,
            (Some(Scope::Data), Some("result"), false) => Scope::Result,
            (Some(Scope::Result), None, true) => Scope::Series,
            (Some(Scope::Series), Some("metric"), true) => Scope::Metric,
            (Some(Scope::Series), Some("values"), false) => Scope::Values,
            (Some(Scope::Values), None, false) => Scope::Pair,
            _ => Scope::Ignored,
        };
        Ok(scope)
    }

    fn open(&mut self, key: Option<String>, object: bool) -> Result<()> {
        if self.scopes.last() == Some(&Scope::Pair) {
            // A nested container still occupies a slot of the pair.
            self.pair.push(PairItem::Other);
        }
        let scope = self.child_scope(key.as_deref(), object)?;
        match scope {
            Scope::Result => self.saw_result = true,
            Scope::Series => {
                self.stats.series += 1;
                self.series = Some(SeriesContext::default());
            }
            Scope::Pair => self.pair.clear(),
            _ => {}
        }
        self.scopes.push(scope);
        Ok(())
    }

    fn close(&mut self) {
        match self.scopes.pop() {
            Some(Scope::Pair) => self.finish_pair(),
            Some(Scope::Metric) => {
                if let Some(series) = self.series.as_mut() {
                    series.labels_complete = true;
                    let deferred = std::mem::take(&mut series.deferred);
                    for (timestamp, value) in deferred {
                        let row = series.row(timestamp, value);
                        self.ready.push_back(row);
                    }
                }
            }
            Some(Scope::Series) => {
                // A series without a metric object still yields its samples.
                if let Some(series) = self.series.take() {
                    for (timestamp, value) in &series.deferred {
                        self.ready.push_back(series.row(*timestamp, value.clone()));
                    }
                }
            }
            _ => {}
        }
    }

    fn scalar(&mut self, key: Option<String>, event: Event) {
        let scope = match self.scopes.last() {
            Some(scope) => *scope,
            None => return,
        };
        match (scope, key.as_deref(), event) {
            (Scope::Root, Some("status"), Event::String(s)) => self.status = Some(s),
            (Scope::Root, Some("errorType"), Event::String(s)) => self.error_type = Some(s),
            (Scope::Root, Some("error"), Event::String(s)) => self.error_message = Some(s),
            (Scope::Data, Some("resultType"), Event::String(s)) => self.result_type = Some(s),
            (Scope::Metric, Some(name), Event::String(value)) => {
                if let Some(series) = self.series.as_mut() {
                    if name == NAME_LABEL {
                        series.metric_name = value;
                    } else {
                        series.labels.insert(name.to_string(), value);
                    }
                }
            }
            (Scope::Pair, None, Event::Number(text)) | (Scope::Pair, None, Event::String(text)) => {
                self.pair.push(PairItem::Text(text))
            }
            (Scope::Pair, None, _) => self.pair.push(PairItem::Other),
            _ => {}
        }
    }

    fn finish_pair(&mut self) {
        let parsed = match self.pair.as_slice() {
            [PairItem::Text(ts), PairItem::Text(value)] => {
                match (parse_timestamp(ts), SampleValue::parse(value)) {
                    (Some(ts), Some(value)) => Some((ts, value)),
                    _ => None,
                }
            }
            _ => None,
        };

        let series = match self.series.as_mut() {
            Some(series) => series,
            None => return,
        };
        match parsed {
            Some((timestamp, value)) if series.labels_complete => {
                let row = series.row(timestamp, value);
                self.ready.push_back(row);
            }
            Some(sample) => series.deferred.push(sample),
            None => {
                self.stats.skipped += 1;
                debug!(
                    metric_name = %series.metric_name,
                    pair = ?self.pair,
                    "Skipping unreadable sample pair"
                );
            }
        }
    }

    fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Key(key) => {
                self.pending_key = Some(key);
                Ok(())
            }
            Event::StartObject => {
                let key = self.pending_key.take();
                self.open(key, true)
            }
            Event::StartArray => {
                let key = self.pending_key.take();
                self.open(key, false)
            }
            Event::EndObject | Event::EndArray => {
                self.pending_key = None;
                self.close();
                Ok(())
            }
            scalar => {
                let key = self.pending_key.take();
                self.scalar(key, scalar);
                Ok(())
            }
        }
    }

    /// Checks the envelope once the document has been read completely.
    fn finish(&self) -> Result<()> {
        if let Some(status) = self.status.as_deref() {
            if status != "success" {
                return Err(Error::InvalidResponse(format!(
                    "query failed with status {:?}: {}: {}",
                    status,
                    self.error_type.as_deref().unwrap_or("unknown"),
                    self.error_message.as_deref().unwrap_or("no error message"),
                )));
            }
        }
        if let Some(result_type) = self.result_type.as_deref() {
            if result_type != "matrix" {
                return Err(Error::InvalidResponse(format!(
                    "expected a matrix result, got {:?}",
                    result_type
                )));
            }
        }
        if self.status.is_none() && !self.saw_result {
            return Err(Error::InvalidResponse(
                "response has neither a status nor a data.result array".to_string(),
            ));
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for RowStream<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.ready.pop_front() {
                self.stats.rows += 1;
                return Some(Ok(row));
            }
            if self.finished {
                return None;
            }
            match self.events.next() {
                Some(Ok(event)) => {
                    if let Err(e) = self.handle(event) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    if let Err(e) = self.finish() {
                        self.ready.clear();
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Converts a fractional-seconds timestamp to whole seconds, rounding toward
/// negative infinity.
fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(decimal) = Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)) {
        return decimal.floor().to_i64();
    }
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() || value < i64::MIN as f64 || value > i64::MAX as f64 {
        return None;
    }
    Some(value.floor() as i64)
}
