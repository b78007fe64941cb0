pub mod error;
pub mod types;

pub use error::{DataError, Result};
pub use types::{
    Metric, RUN_TIMESTAMP_FORMAT, Run, format_timestamp, parse_timestamp, timestamp_from_epoch_millis,
    timestamp_from_epoch_secs,
};
