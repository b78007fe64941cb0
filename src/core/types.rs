use super::error::{DataError, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::Path;

/// Timestamp layout used by run records: `YYYY-MM-DDTHH:MM:SS.ffffff`.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Base record fields that are parsed into timestamps.
pub const TIMESTAMP_FIELDS: [&str; 3] = ["start_time", "stop_time", "heartbeat"];

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, RUN_TIMESTAMP_FORMAT).ok()
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Converts a floating point UNIX epoch (seconds) into a UTC timestamp with microsecond precision.
pub fn timestamp_from_epoch_secs(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64).map(|dt| dt.naive_utc())
}

pub fn timestamp_from_epoch_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

fn serialize_timestamp<S: Serializer>(ts: &NaiveDateTime, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(ts))
}

fn serialize_timestamps<S: Serializer>(
    ts: &[NaiveDateTime],
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(ts.iter().map(format_timestamp))
}

// ============================================================================
// Run
// ============================================================================

/// One recorded execution of an experiment.
///
/// Only constructible from a complete set of fragments: the base record,
/// the config and the info document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub start_time: NaiveDateTime,
    #[serde(serialize_with = "serialize_timestamp")]
    pub stop_time: NaiveDateTime,
    #[serde(serialize_with = "serialize_timestamp")]
    pub heartbeat: NaiveDateTime,
    pub config: Value,
    pub info: Value,
    /// Remaining base record fields, kept verbatim.
    #[serde(flatten)]
    pub record: Map<String, Value>,
}

impl Run {
    /// Normalize the three raw fragments of a run.
    ///
    /// `source` is the base record's path and is only used for error reporting.
    pub fn from_fragments(
        id: impl Into<String>,
        base: Value,
        config: Value,
        info: Value,
        source: &Path,
    ) -> Result<Self> {
        let invalid = |reason: String| DataError::InvalidFragment {
            path: source.to_path_buf(),
            reason,
        };

        let Value::Object(mut record) = base else {
            return Err(invalid("base record is not a JSON object".to_string()));
        };

        let mut times = [NaiveDateTime::default(); 3];
        for (slot, field) in times.iter_mut().zip(TIMESTAMP_FIELDS) {
            let raw = record
                .remove(field)
                .ok_or_else(|| invalid(format!("missing field '{}'", field)))?;
            let text = raw
                .as_str()
                .ok_or_else(|| invalid(format!("field '{}' is not a string", field)))?;
            *slot = parse_timestamp(text)
                .ok_or_else(|| invalid(format!("field '{}' has bad timestamp '{}'", field, text)))?;
        }
        // Normalized fields take precedence over anything the record carried.
        for key in ["_id", "config", "info"] {
            record.remove(key);
        }

        let [start_time, stop_time, heartbeat] = times;
        Ok(Self {
            id: id.into(),
            start_time,
            stop_time,
            heartbeat,
            config,
            info,
            record,
        })
    }

    /// Resolve a dotted field path such as `config.optimizer.lr` or `start_time`.
    pub fn field(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let head = parts.next()?;
        let mut rest = parts.peekable();

        let root = match head {
            "_id" | "id" | "start_time" | "stop_time" | "heartbeat" => {
                if rest.peek().is_some() {
                    return None;
                }
                let text = match head {
                    "start_time" => format_timestamp(&self.start_time),
                    "stop_time" => format_timestamp(&self.stop_time),
                    "heartbeat" => format_timestamp(&self.heartbeat),
                    _ => self.id.clone(),
                };
                return Some(Value::String(text));
            }
            "config" => &self.config,
            "info" => &self.info,
            other => self.record.get(other)?,
        };

        let mut current = root;
        for part in rest {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

// ============================================================================
// Metric
// ============================================================================

/// A named time series recorded during a run.
///
/// `steps`, `timestamps` and `values` are index-aligned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub metric_id: String,
    pub run_id: String,
    pub name: String,
    pub steps: Vec<i64>,
    #[serde(serialize_with = "serialize_timestamps")]
    pub timestamps: Vec<NaiveDateTime>,
    pub values: Vec<f64>,
}

impl Metric {
    pub fn new(metric_id: impl Into<String>, run_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metric_id: metric_id.into(),
            run_id: run_id.into(),
            name: name.into(),
            steps: Vec::new(),
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, step: i64, timestamp: NaiveDateTime, value: f64) {
        self.steps.push(step);
        self.timestamps.push(timestamp);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_aligned(&self) -> bool {
        self.steps.len() == self.timestamps.len() && self.steps.len() == self.values.len()
    }

    /// Iterate over `(step, timestamp, value)` points.
    pub fn points(&self) -> impl Iterator<Item = (i64, NaiveDateTime, f64)> + '_ {
        self.steps
            .iter()
            .zip(&self.timestamps)
            .zip(&self.values)
            .map(|((step, ts), value)| (*step, *ts, *value))
    }
}
