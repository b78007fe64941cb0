use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use runboard::{
    Cursor, DirectoryArtifactStore, FileStorage, MemoryRecordStore, MetricResolver, MetricsConfig, QueryFilter,
    RunQuery, SortDirection,
};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runboard")]
#[command(about = "Inspect experiment runs and metrics")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List runs found under a storage root
    Runs {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        sort_by: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        limit: Option<usize>,
        /// Filter document, e.g. '{"type":"and","filters":[...]}'
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show a single run
    Run {
        #[arg(long)]
        root: PathBuf,
        run_id: String,
    },
    /// Resolve a metric of a run
    Metric {
        /// JSON file of record collections, e.g. {"metrics": [...]}
        #[arg(long)]
        records: Option<PathBuf>,
        /// Directory holding summary artifacts named by id
        #[arg(long)]
        artifacts: PathBuf,
        #[arg(long)]
        max_events: Option<u64>,
        #[arg(long)]
        no_verify: bool,
        run_id: String,
        metric_id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Runs {
            root,
            sort_by,
            desc,
            start,
            limit,
            filter,
        } => {
            let direction = if desc { SortDirection::Desc } else { SortDirection::Asc };
            let mut query = RunQuery::all().start(start);
            if let Some(field) = sort_by {
                query = query.sort_by(&field, direction);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            if let Some(filter) = filter {
                query = query.filter(QueryFilter::from_json(&filter)?);
            }
            list_runs(root, &query)
        }
        Command::Run { root, run_id } => show_run(root, &run_id),
        Command::Metric {
            records,
            artifacts,
            max_events,
            no_verify,
            run_id,
            metric_id,
        } => {
            let mut config = MetricsConfig::default().verify_checksums(!no_verify);
            config.max_events = max_events;
            show_metric(records, artifacts, config, &run_id, &metric_id)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_storage(root: PathBuf) -> Result<FileStorage> {
    FileStorage::open(&root).with_context(|| format!("Failed to open storage root '{}'", root.display()))
}

fn list_runs(root: PathBuf, query: &RunQuery) -> Result<()> {
    let storage = open_storage(root)?;
    let cursor = storage.get_runs(query)?;
    let runs = cursor.iter().collect::<runboard::Result<Vec<_>>>()?;

    let output = json!({ "count": cursor.count(), "runs": runs });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn show_run(root: PathBuf, run_id: &str) -> Result<()> {
    let storage = open_storage(root)?;
    let run = storage
        .get_run(run_id)?
        .ok_or_else(|| anyhow!("Run '{}' not found", run_id))?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

fn show_metric(
    records: Option<PathBuf>,
    artifacts: PathBuf,
    config: MetricsConfig,
    run_id: &str,
    metric_id: &str,
) -> Result<()> {
    let records = match records {
        Some(path) => MemoryRecordStore::from_json_file(&path)
            .with_context(|| format!("Failed to load records from '{}'", path.display()))?,
        None => MemoryRecordStore::new(),
    };
    let resolver = MetricResolver::with_config(records, DirectoryArtifactStore::new(artifacts), config);

    let metric = resolver.get_metric(run_id, metric_id)?;
    println!("{}", serde_json::to_string_pretty(&metric)?);
    Ok(())
}
