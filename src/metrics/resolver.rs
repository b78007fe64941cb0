//! Metric lookup by `(run id, metric id)`.
//!
//! A metric id is either a record-store key, in which case the metric is a
//! single stored document, or a summary id `<marker>_<artifact>_<tag>`, in
//! which case the series is rebuilt by scanning the artifact's event log for
//! `tag`. The scan reads the whole log unless `max_events` caps it.

use super::event_log::EventReader;
use super::id::{MetricId, RecordId};
use super::store::{ArtifactStore, Document, RecordQuery, RecordStore, key_form};
use crate::core::{
    DataError, Metric, Result, parse_timestamp, timestamp_from_epoch_millis, timestamp_from_epoch_secs,
};
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{Level, event, info_span};

/// Configuration for [`MetricResolver`]
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Record-store collection holding metric documents
    pub collection: String,
    /// Prefix marking summary-encoded metric ids
    pub summary_marker: String,
    /// Stop decoding a summary log after this many events
    pub max_events: Option<u64>,
    /// Verify record checksums while decoding summary logs
    pub verify_checksums: bool,
    /// Directory for scratch copies of summary logs; the system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            collection: "metrics".to_string(),
            summary_marker: "tfsummary".to_string(),
            max_events: None,
            verify_checksums: true,
            scratch_dir: None,
        }
    }
}

impl MetricsConfig {
    pub fn collection(mut self, name: &str) -> Self {
        self.collection = name.to_string();
        self
    }

    pub fn summary_marker(mut self, marker: &str) -> Self {
        self.summary_marker = marker.to_string();
        self
    }

    pub fn max_events(mut self, max: u64) -> Self {
        self.max_events = Some(max);
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn scratch_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.scratch_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

pub struct MetricResolver<S, A> {
    records: S,
    artifacts: A,
    config: MetricsConfig,
}

impl<S: RecordStore, A: ArtifactStore> MetricResolver<S, A> {
    pub fn new(records: S, artifacts: A) -> Self {
        Self::with_config(records, artifacts, MetricsConfig::default())
    }

    pub fn with_config(records: S, artifacts: A, config: MetricsConfig) -> Self {
        Self {
            records,
            artifacts,
            config,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Resolve a metric of the given run.
    ///
    /// Unknown or malformed ids and missing records fail with
    /// [`DataError::NotFound`]. Errors reading a located summary log
    /// propagate unchanged.
    pub fn get_metric(&self, run_id: &str, metric_id: &str) -> Result<Metric> {
        match MetricId::parse(metric_id, &self.config.summary_marker)? {
            MetricId::Record(key) => self.read_record(run_id, metric_id, &key),
            MetricId::Summary { artifact_id, tag } => self.read_summary(run_id, metric_id, &artifact_id, &tag),
        }
    }

    fn read_record(&self, run_id: &str, metric_id: &str, key: &RecordId) -> Result<Metric> {
        let query = RecordQuery::new().eq("_id", key.to_hex()).eq("run_id", run_id);
        let document = self
            .records
            .find_record(&self.config.collection, &query)?
            .ok_or_else(|| DataError::NotFound(format!("Metric '{}' for run '{}'", metric_id, run_id)))?;
        metric_from_record(&document)
    }

    fn read_summary(&self, run_id: &str, metric_id: &str, artifact_id: &str, tag: &str) -> Result<Metric> {
        let span = info_span!("summary_decode", artifact = %artifact_id, tag = %tag);
        let _guard = span.enter();

        // The scratch copy is removed when `scratch` drops, on every exit path.
        let scratch_dir = self.config.scratch_dir.clone().unwrap_or_else(std::env::temp_dir);
        let mut scratch = NamedTempFile::new_in(&scratch_dir).map_err(|source| DataError::Io {
            path: scratch_dir,
            source,
        })?;
        {
            let mut artifact = self.artifacts.get_artifact(artifact_id)?;
            io::copy(&mut artifact, scratch.as_file_mut()).map_err(|source| DataError::Io {
                path: scratch.path().to_path_buf(),
                source,
            })?;
        }
        let file = scratch.reopen().map_err(|source| DataError::Io {
            path: scratch.path().to_path_buf(),
            source,
        })?;

        let mut events = EventReader::new(BufReader::new(file), self.config.verify_checksums)
            .max_events(self.config.max_events);
        let mut metric = Metric::new(metric_id, run_id, tag);
        let mut scanned = 0u64;
        for decoded in events.by_ref() {
            let decoded = decoded?;
            scanned += 1;
            for measurement in decoded.values.iter().filter(|v| v.tag == tag) {
                let Some(value) = measurement.value else {
                    continue;
                };
                let timestamp = timestamp_from_epoch_secs(decoded.wall_time).ok_or_else(|| {
                    DataError::EventLog(format!("event at step {} has bad wall time {}", decoded.step, decoded.wall_time))
                })?;
                metric.push(decoded.step, timestamp, value);
            }
        }

        if events.capped() {
            event!(Level::INFO, scanned, "summary scan stopped at event cap");
        }
        event!(Level::DEBUG, scanned, points = metric.len(), "summary decoded");
        Ok(metric)
    }
}

// ============================================================================
// Record projection
// ============================================================================

/// Project a stored metric document into the canonical [`Metric`] shape.
pub fn metric_from_record(document: &Document) -> Result<Metric> {
    let invalid = |what: &str| DataError::InvalidRecord(what.to_string());

    let metric_id = document
        .get("_id")
        .and_then(key_form)
        .ok_or_else(|| invalid("missing or malformed '_id'"))?;
    let run_id = document
        .get("run_id")
        .and_then(key_form)
        .ok_or_else(|| invalid("missing or malformed 'run_id'"))?;
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing or malformed 'name'"))?;

    let steps = array_field(document, "steps")?
        .iter()
        .map(|v| v.as_i64().ok_or_else(|| invalid("non-integer step")))
        .collect::<Result<Vec<_>>>()?;
    let timestamps = array_field(document, "timestamps")?
        .iter()
        .map(|v| record_timestamp(v).ok_or_else(|| invalid("unparseable timestamp")))
        .collect::<Result<Vec<_>>>()?;
    let values = array_field(document, "values")?
        .iter()
        .map(|v| match v {
            Value::Null => Ok(f64::NAN),
            other => other.as_f64().ok_or_else(|| invalid("non-numeric value")),
        })
        .collect::<Result<Vec<_>>>()?;

    let metric = Metric {
        metric_id: metric_id.into_owned(),
        run_id: run_id.into_owned(),
        name: name.to_string(),
        steps,
        timestamps,
        values,
    };
    if !metric.is_aligned() {
        return Err(DataError::InvalidRecord(format!(
            "metric '{}' has {} steps, {} timestamps and {} values",
            metric.metric_id,
            metric.steps.len(),
            metric.timestamps.len(),
            metric.values.len()
        )));
    }
    Ok(metric)
}

fn array_field<'a>(document: &'a Document, field: &str) -> Result<&'a Vec<Value>> {
    document
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::InvalidRecord(format!("missing or malformed '{}'", field)))
}

/// Timestamps as stored by document stores: the run timestamp layout,
/// RFC 3339, epoch milliseconds, or an extended-JSON `{"$date": ...}` wrapper.
fn record_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(text) => parse_timestamp(text)
            .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_utc())),
        Value::Number(n) => timestamp_from_epoch_millis(n.as_i64()?),
        Value::Object(map) if map.len() == 1 => {
            if let Some(inner) = map.get("$date") {
                record_timestamp(inner)
            } else {
                let millis = map.get("$numberLong")?.as_str()?.parse().ok()?;
                timestamp_from_epoch_millis(millis)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_metric_from_record() {
        let metric = metric_from_record(&document(json!({
            "_id": {"$oid": "5f1b2c3d4e5f60718293a4b5"},
            "run_id": 12,
            "name": "loss",
            "steps": [0, 1],
            "timestamps": ["2020-01-01T00:00:00.000000", {"$date": "2020-01-01T00:00:01Z"}],
            "values": [0.5, 0.3]
        })))
        .unwrap();

        assert_eq!(metric.metric_id, "5f1b2c3d4e5f60718293a4b5");
        assert_eq!(metric.run_id, "12");
        assert_eq!(metric.steps, vec![0, 1]);
        assert_eq!(metric.timestamps[1], parse_timestamp("2020-01-01T00:00:01.000000").unwrap());
        assert_eq!(metric.values, vec![0.5, 0.3]);
    }

    #[test]
    fn test_metric_from_record_rejects_misaligned() {
        let err = metric_from_record(&document(json!({
            "_id": "a", "run_id": "r1", "name": "loss",
            "steps": [0, 1], "timestamps": [1577836800000i64], "values": [0.5, 0.3]
        })))
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidRecord(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_record_timestamp_forms() {
        let expected = parse_timestamp("2020-01-01T00:00:00.000000");
        assert_eq!(record_timestamp(&json!(1577836800000i64)), expected);
        assert_eq!(record_timestamp(&json!({"$date": 1577836800000i64})), expected);
        assert_eq!(record_timestamp(&json!({"$date": {"$numberLong": "1577836800000"}})), expected);
        assert_eq!(record_timestamp(&json!("2020-01-01T00:00:00+00:00")), expected);
        assert_eq!(record_timestamp(&json!(true)), None);
    }

    #[test]
    fn test_config_builder() {
        let config = MetricsConfig::default().summary_marker("m").max_events(100).verify_checksums(false);
        assert_eq!(config.collection, "metrics");
        assert_eq!(config.summary_marker, "m");
        assert_eq!(config.max_events, Some(100));
        assert!(!config.verify_checksums);
    }
}
