// ============================================================================
// Runboard Library
// ============================================================================

pub mod core;
pub mod cursor;
pub mod metrics;
pub mod query;
pub mod storage;

// Re-export main types for convenience
pub use core::{DataError, Metric, Result, Run};
pub use cursor::{Cursor, VecCursor};
pub use metrics::{
    ArtifactStore, DirectoryArtifactStore, MemoryRecordStore, MetricResolver, MetricsConfig, RecordQuery,
    RecordStore,
};
pub use query::{FilterOperator, QueryFilter, RunQuery, SortDirection};
pub use storage::{FileStorage, FileStorageConfig, FileStoreCursor, ScanReport};

// ============================================================================
// High-level data access
// ============================================================================

/// Read-only access to runs and their metrics
///
/// Runs come from a file store; metrics come from a document store, with
/// summary event logs fetched from an artifact store as a fallback.
///
/// # Examples
///
/// ```no_run
/// use runboard::{Cursor, DirectoryArtifactStore, FileStorage, MemoryRecordStore, RunBoard, RunQuery};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let board = RunBoard::new(
///     FileStorage::open("~/experiments")?,
///     MemoryRecordStore::from_json_file("metrics.json")?,
///     DirectoryArtifactStore::new("artifacts"),
/// );
///
/// let runs = board.get_runs(&RunQuery::all())?;
/// println!("{} candidate runs", runs.count());
/// for run in runs.iter() {
///     let run = run?;
///     println!("{} started {}", run.id, run.start_time);
/// }
/// # Ok(())
/// # }
/// ```
pub struct RunBoard<S, A> {
    runs: FileStorage,
    metrics: MetricResolver<S, A>,
}

impl<S: RecordStore, A: ArtifactStore> RunBoard<S, A> {
    pub fn new(runs: FileStorage, records: S, artifacts: A) -> Self {
        Self::with_metrics(runs, MetricResolver::new(records, artifacts))
    }

    pub fn with_metrics(runs: FileStorage, metrics: MetricResolver<S, A>) -> Self {
        Self { runs, metrics }
    }

    /// Look up a single run; `Ok(None)` when it does not exist.
    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.runs.get_run(run_id)
    }

    /// Rescan the file store and list runs.
    pub fn get_runs(&self, query: &RunQuery) -> Result<FileStoreCursor<'_>> {
        self.runs.get_runs(query)
    }

    /// Resolve a metric of a run.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use runboard::{DirectoryArtifactStore, FileStorage, MemoryRecordStore, RunBoard};
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let board = RunBoard::new(FileStorage::open("runs")?, MemoryRecordStore::new(), DirectoryArtifactStore::new("artifacts"));
    /// match board.get_metric("a1b2c3d", "tfsummary_5f1b2c3d_loss") {
    ///     Ok(metric) => println!("{} points", metric.len()),
    ///     Err(err) if err.is_not_found() => println!("no such metric"),
    ///     Err(err) => return Err(err.into()),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_metric(&self, run_id: &str, metric_id: &str) -> Result<Metric> {
        self.metrics.get_metric(run_id, metric_id)
    }

    pub fn file_storage(&self) -> &FileStorage {
        &self.runs
    }

    pub fn metric_resolver(&self) -> &MetricResolver<S, A> {
        &self.metrics
    }
}
