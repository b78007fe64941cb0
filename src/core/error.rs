use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Fragment '{}' is missing", path.display())]
    MissingFragment { path: PathBuf },

    #[error("Fragment '{}' is malformed: {source}", path.display())]
    MalformedFragment {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Fragment '{}' is invalid: {reason}", path.display())]
    InvalidFragment { path: PathBuf, reason: String },

    #[error("Permission denied: '{}'", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid metric record: {0}")]
    InvalidRecord(String),

    #[error("Event log error: {0}")]
    EventLog(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

pub type Result<T> = std::result::Result<T, DataError>;

impl DataError {
    /// Classify an I/O failure on `path` into the absence / permission / fatal buckets.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory => {
                DataError::MissingFragment { path }
            }
            io::ErrorKind::PermissionDenied => DataError::PermissionDenied { path },
            _ => DataError::Io { path, source: err },
        }
    }

    /// The requested entity does not exist under the current rules.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound(_) | DataError::MissingFragment { .. })
    }

    /// Failures that only disqualify a single run candidate during discovery.
    ///
    /// Anything outside this set propagates to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DataError::MissingFragment { .. }
                | DataError::MalformedFragment { .. }
                | DataError::InvalidFragment { .. }
                | DataError::PermissionDenied { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let path = Path::new("/tmp/run.json");

        let missing = DataError::from_io(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, DataError::MissingFragment { .. }));
        assert!(missing.is_recoverable());
        assert!(missing.is_not_found());

        let not_dir = DataError::from_io(path, io::Error::from(io::ErrorKind::NotADirectory));
        assert!(matches!(not_dir, DataError::MissingFragment { .. }));

        let denied = DataError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(denied.is_recoverable());
        assert!(!denied.is_not_found());

        let other = DataError::from_io(path, io::Error::other("disk on fire"));
        assert!(matches!(other, DataError::Io { .. }));
        assert!(!other.is_recoverable());
    }

    #[test]
    fn test_event_log_errors_are_fatal() {
        let err = DataError::EventLog("truncated record".to_string());
        assert!(!err.is_recoverable());
        assert!(!err.is_not_found());
    }
}
