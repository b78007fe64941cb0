//! Metric resolution against a document store, with a fallback that
//! rebuilds series from binary summary event logs.

pub mod event_log;
pub mod id;
pub mod resolver;
pub mod store;

pub use event_log::{Event, EventReader, RecordReader, SummaryValue, crc32c, masked_crc32c};
pub use id::{MetricId, RecordId};
pub use resolver::{MetricResolver, MetricsConfig, metric_from_record};
pub use store::{ArtifactStore, DirectoryArtifactStore, Document, MemoryRecordStore, RecordQuery, RecordStore};
