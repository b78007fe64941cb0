pub mod filestore;
pub mod run_id;

pub use filestore::{
    CONFIG_JSON, FileStorage, FileStorageConfig, FileStoreCursor, INFO_JSON, RUN_JSON, RunIndex, ScanReport,
};
pub use run_id::{DEFAULT_ID_LENGTH, run_id_for_path};
