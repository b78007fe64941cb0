use crate::core::{DataError, Result};
use std::fmt;

/// Document-store key: a 12-byte object id written as 24 hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId([u8; 12]);

impl RecordId {
    pub fn parse(text: &str) -> Option<Self> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(text, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// How a metric identifier is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricId {
    /// Stored directly as a document in the record store
    Record(RecordId),
    /// Reconstructed from a summary event log: `<marker>_<artifact>_<tag>`
    Summary { artifact_id: String, tag: String },
}

impl MetricId {
    /// Classify `metric_id`. Ids that are neither a record key nor a
    /// well-formed summary id are reported as not found.
    pub fn parse(metric_id: &str, summary_marker: &str) -> Result<Self> {
        if let Some(key) = RecordId::parse(metric_id) {
            return Ok(MetricId::Record(key));
        }

        let summary = metric_id
            .strip_prefix(summary_marker)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.split_once('_'));
        if let Some((artifact_id, tag)) = summary {
            if !summary_marker.is_empty() && !artifact_id.is_empty() && !tag.is_empty() {
                return Ok(MetricId::Summary {
                    artifact_id: artifact_id.to_string(),
                    tag: tag.to_string(),
                });
            }
        }

        Err(DataError::NotFound(format!("Metric '{}'", metric_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_round_trips_hex() {
        let id = RecordId::parse("5f1b2c3d4e5f60718293a4b5").unwrap();
        assert_eq!(id.to_hex(), "5f1b2c3d4e5f60718293a4b5");
        assert_eq!(id.as_bytes()[0], 0x5f);

        let upper = RecordId::parse("5F1B2C3D4E5F60718293A4B5").unwrap();
        assert_eq!(upper, id);
    }

    #[test]
    fn test_record_id_rejects_bad_keys() {
        assert!(RecordId::parse("bogus").is_none());
        assert!(RecordId::parse("5f1b2c3d4e5f60718293a4b").is_none());
        assert!(RecordId::parse("5f1b2c3d4e5f60718293a4bz").is_none());
        assert!(RecordId::parse("").is_none());
    }

    #[test]
    fn test_metric_id_record() {
        let parsed = MetricId::parse("5f1b2c3d4e5f60718293a4b5", "tfsummary").unwrap();
        assert!(matches!(parsed, MetricId::Record(_)));
    }

    #[test]
    fn test_metric_id_summary_keeps_underscores_in_tag() {
        let parsed = MetricId::parse("tfsummary_5f1b2c3d_train_loss", "tfsummary").unwrap();
        assert_eq!(
            parsed,
            MetricId::Summary {
                artifact_id: "5f1b2c3d".to_string(),
                tag: "train_loss".to_string(),
            }
        );
    }

    #[test]
    fn test_metric_id_not_found() {
        for id in ["bogus", "tfsummary", "tfsummary_abc", "tfsummary__loss", "tfsummaryx_abc_loss"] {
            let err = MetricId::parse(id, "tfsummary").unwrap_err();
            assert!(err.is_not_found(), "{} should be not found", id);
        }
    }

    #[test]
    fn test_marker_with_underscores() {
        let parsed = MetricId::parse("tf_summary_abc_train_loss", "tf_summary").unwrap();
        assert_eq!(
            parsed,
            MetricId::Summary {
                artifact_id: "abc".to_string(),
                tag: "train_loss".to_string(),
            }
        );
        assert!(MetricId::parse("tf_summaryabc_loss", "tf_summary").unwrap_err().is_not_found());
        assert!(MetricId::parse("tfsummary_abc_loss", "tf_summary").unwrap_err().is_not_found());
    }

    #[test]
    fn test_custom_marker() {
        let parsed = MetricId::parse("m_artifact_acc", "m").unwrap();
        assert!(matches!(parsed, MetricId::Summary { ref tag, .. } if tag == "acc"));
    }
}
