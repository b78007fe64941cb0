//! Run store backed by a plain directory tree.
//!
//! Every directory under the storage root is a run candidate. A candidate
//! becomes a run when it holds a base record, a config record and an info
//! record that all parse. Run identifiers are derived from the directory's
//! absolute path (see [`run_id_for_path`]), so no database is needed to keep
//! them stable across scans.
//!
//! The run index (id → directory) is built lazily by `get_run`, rebuilt on
//! every `get_runs`, and otherwise reused until [`FileStorage::invalidate`].

use super::run_id::{DEFAULT_ID_LENGTH, run_id_for_path};
use crate::core::{DataError, Result, Run};
use crate::cursor::Cursor;
use crate::query::{RunQuery, sort_runs};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use walkdir::WalkDir;

pub const RUN_JSON: &str = "run.json";
pub const CONFIG_JSON: &str = "config.json";
pub const INFO_JSON: &str = "info.json";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for [`FileStorage`]
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Storage root; a leading `~` expands to `$HOME`
    pub root: PathBuf,
    /// Base run record file name
    pub run_file: String,
    /// Config record file name
    pub config_file: String,
    /// Info record file name
    pub info_file: String,
    /// Hex characters kept from the path digest
    pub id_length: usize,
}

impl FileStorageConfig {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            run_file: RUN_JSON.to_string(),
            config_file: CONFIG_JSON.to_string(),
            info_file: INFO_JSON.to_string(),
            id_length: DEFAULT_ID_LENGTH,
        }
    }

    pub fn run_file(mut self, name: &str) -> Self {
        self.run_file = name.to_string();
        self
    }

    pub fn config_file(mut self, name: &str) -> Self {
        self.config_file = name.to_string();
        self
    }

    pub fn info_file(mut self, name: &str) -> Self {
        self.info_file = name.to_string();
        self
    }

    pub fn id_length(mut self, len: usize) -> Self {
        self.id_length = len;
        self
    }
}

// ============================================================================
// Run index
// ============================================================================

/// Mapping from derived run id to run directory, in discovery order.
#[derive(Debug, Default)]
pub struct RunIndex {
    order: Vec<String>,
    paths: HashMap<String, PathBuf>,
}

impl RunIndex {
    /// Register a run directory. Returns the path it replaced on an id collision.
    fn insert(&mut self, id: String, path: PathBuf) -> Option<PathBuf> {
        match self.paths.insert(id.clone(), path) {
            Some(previous) => Some(previous),
            None => {
                self.order.push(id);
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Path> {
        self.paths.get(id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.paths.get(id).map(|path| (id.as_str(), path.as_path())))
    }
}

/// Outcome of the latest directory scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Directories visited, the root included
    pub visited: usize,
    /// Directories registered in the index
    pub indexed: usize,
    /// Candidates dropped because a fragment was missing, malformed or unreadable
    pub skipped: usize,
    /// Identifier collisions resolved by last-writer-wins
    pub collisions: usize,
}

// ============================================================================
// File storage
// ============================================================================

pub struct FileStorage {
    config: FileStorageConfig,
    root: PathBuf,
    index: RwLock<Option<Arc<RunIndex>>>,
    last_scan: RwLock<Option<ScanReport>>,
}

impl FileStorage {
    /// Open a file store rooted at `root` with default fragment names.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::with_config(FileStorageConfig::new(root))
    }

    pub fn with_config(config: FileStorageConfig) -> Result<Self> {
        let expanded = expand_home(&config.root);
        let root = std::path::absolute(&expanded).map_err(|source| DataError::Io {
            path: expanded.clone(),
            source,
        })?;

        Ok(Self {
            config,
            root,
            index: RwLock::new(None),
            last_scan: RwLock::new(None),
        })
    }

    /// Absolute storage root that run ids are derived from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &FileStorageConfig {
        &self.config
    }

    pub fn last_scan(&self) -> Option<ScanReport> {
        *self.last_scan.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the cached run index; the next `get_run` rescans.
    pub fn invalidate(&self) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Return the run with the given id, or `None` when the id is unknown
    /// or its files disappeared since the last scan.
    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let index = self.index_or_scan()?;
        let Some(path) = index.get(run_id) else {
            return Ok(None);
        };

        match self.load_run(run_id, path) {
            Ok(run) => Ok(Some(run)),
            Err(err) if err.is_not_found() => {
                debug!("Run '{}' vanished from '{}': {}", run_id, path.display(), err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Rescan the storage root and return the runs matching `query`.
    pub fn get_runs(&self, query: &RunQuery) -> Result<FileStoreCursor<'_>> {
        let filter = query.filter.as_ref().map(|f| f.compile()).transpose()?;
        let index = self.scan_for_runs()?;

        if query.is_streaming() {
            return Ok(FileStoreCursor {
                storage: self,
                count: index.len(),
                source: CursorSource::Index(index),
                query: query.clone(),
            });
        }

        let mut runs = Vec::with_capacity(index.len());
        for (run_id, path) in index.iter() {
            if let Some(run) = self.load_candidate(run_id, path) {
                let run = run?;
                if filter.as_ref().is_none_or(|f| f.matches(&run)) {
                    runs.push(run);
                }
            }
        }
        if let Some(field) = &query.sort_by {
            sort_runs(&mut runs, field, query.direction);
        }

        Ok(FileStoreCursor {
            storage: self,
            count: runs.len(),
            source: CursorSource::Materialized(runs),
            query: query.clone(),
        })
    }

    fn index_or_scan(&self) -> Result<Arc<RunIndex>> {
        let cached = self.index.read().unwrap_or_else(PoisonError::into_inner).clone();
        match cached {
            Some(index) => Ok(index),
            None => self.scan_for_runs(),
        }
    }

    /// Walk the storage root and rebuild the run index from scratch.
    fn scan_for_runs(&self) -> Result<Arc<RunIndex>> {
        let mut index = RunIndex::default();
        let mut report = ScanReport::default();

        let walker = WalkDir::new(&self.root).follow_links(false).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if is_skippable_walk_error(&err) {
                        debug!("Skipping unreadable entry during scan: {}", err);
                        continue;
                    }
                    let path = err.path().unwrap_or(self.root.as_path()).to_path_buf();
                    return Err(DataError::Io { path, source: io::Error::from(err) });
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            report.visited += 1;
            let dir = entry.path();
            let run_id = run_id_for_path(dir, self.config.id_length);

            match self.load_run(&run_id, dir) {
                Ok(_) => {
                    if let Some(previous) = index.insert(run_id.clone(), dir.to_path_buf()) {
                        warn!(
                            "Run id '{}' collides: '{}' replaces '{}'",
                            run_id,
                            dir.display(),
                            previous.display()
                        );
                        report.collisions += 1;
                    }
                }
                Err(err) if err.is_recoverable() => {
                    debug!("Skipping run candidate '{}': {}", dir.display(), err);
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        report.indexed = index.len();
        info!(
            "Scanned '{}': {} directories, {} runs, {} skipped, {} collisions",
            self.root.display(),
            report.visited,
            report.indexed,
            report.skipped,
            report.collisions
        );

        let index = Arc::new(index);
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&index));
        *self.last_scan.write().unwrap_or_else(PoisonError::into_inner) = Some(report);
        Ok(index)
    }

    /// Load an indexed run for iteration: `None` when the candidate went bad
    /// in a recoverable way, `Some(Err)` for anything else.
    fn load_candidate(&self, run_id: &str, path: &Path) -> Option<Result<Run>> {
        match self.load_run(run_id, path) {
            Ok(run) => Some(Ok(run)),
            Err(err) if err.is_recoverable() => {
                debug!("Skipping run '{}' at '{}': {}", run_id, path.display(), err);
                None
            }
            Err(err) => Some(Err(err)),
        }
    }

    fn load_run(&self, run_id: &str, dir: &Path) -> Result<Run> {
        let run_path = dir.join(&self.config.run_file);
        let config = read_json(&dir.join(&self.config.config_file))?;
        let base = read_json(&run_path)?;
        let info = read_json(&dir.join(&self.config.info_file))?;
        Run::from_fragments(run_id, base, config, info, &run_path)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).map_err(|err| DataError::from_io(path, err))?;
    serde_json::from_slice(&bytes).map_err(|source| DataError::MalformedFragment {
        path: path.to_path_buf(),
        source,
    })
}

fn is_skippable_walk_error(err: &walkdir::Error) -> bool {
    if err.loop_ancestor().is_some() {
        return true;
    }
    matches!(
        err.io_error().map(io::Error::kind),
        Some(io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::PermissionDenied)
    )
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

// ============================================================================
// Cursor
// ============================================================================

enum CursorSource {
    Index(Arc<RunIndex>),
    Materialized(Vec<Run>),
}

/// Runs produced by [`FileStorage::get_runs`].
///
/// When the query has no sort or filter, runs are loaded from disk one at a
/// time as the caller advances, and `count()` is the number of indexed
/// candidates. Otherwise `count()` is the number of matching runs.
/// Pagination applies to the produced sequence in both cases.
pub struct FileStoreCursor<'a> {
    storage: &'a FileStorage,
    source: CursorSource,
    count: usize,
    query: RunQuery,
}

impl Cursor for FileStoreCursor<'_> {
    type Item = Result<Run>;

    fn count(&self) -> usize {
        self.count
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<Run>> + '_> {
        match &self.source {
            CursorSource::Index(index) => {
                let storage = self.storage;
                let runs = index
                    .iter()
                    .filter_map(move |(run_id, path)| storage.load_candidate(run_id, path));
                self.query.paginate(runs)
            }
            CursorSource::Materialized(runs) => self.query.paginate(runs.iter().cloned().map(Ok)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let Some(home) = std::env::var_os("HOME") else {
            return;
        };
        assert_eq!(expand_home(Path::new("~/runs")), PathBuf::from(home).join("runs"));
        assert_eq!(expand_home(Path::new("/srv/runs")), PathBuf::from("/srv/runs"));
        assert_eq!(expand_home(Path::new("~runs")), PathBuf::from("~runs"));
    }

    #[test]
    fn test_run_index_keeps_discovery_order() {
        let mut index = RunIndex::default();
        assert!(index.insert("b".into(), PathBuf::from("/b")).is_none());
        assert!(index.insert("a".into(), PathBuf::from("/a")).is_none());
        let replaced = index.insert("b".into(), PathBuf::from("/b2"));

        assert_eq!(replaced, Some(PathBuf::from("/b")));
        assert_eq!(index.len(), 2);
        let ids: Vec<_> = index.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(index.get("b"), Some(Path::new("/b2")));
    }

    #[test]
    fn test_config_builder() {
        let config = FileStorageConfig::new("/runs").run_file("base.json").id_length(10);
        assert_eq!(config.run_file, "base.json");
        assert_eq!(config.config_file, CONFIG_JSON);
        assert_eq!(config.id_length, 10);
    }
}
