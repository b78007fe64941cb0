mod common;

use common::{encode_event, summary_log, write_run};
use runboard::{Cursor, DirectoryArtifactStore, FileStorage, MemoryRecordStore, RunBoard, RunQuery};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_runs_and_metrics_through_one_board() {
    let runs_dir = TempDir::new().unwrap();
    let artifacts_dir = TempDir::new().unwrap();

    write_run(
        &runs_dir.path().join("mnist"),
        &json!({
            "start_time": "2020-01-01T00:00:00.000000",
            "stop_time": "2020-01-01T01:00:00.000000",
            "heartbeat": "2020-01-01T00:59:00.000000",
            "status": "COMPLETED"
        }),
        &json!({"lr": 0.1}),
        &json!({"tensorflow": {"logdirs": ["logs"]}}),
    );
    fs::write(
        artifacts_dir.path().join("events1"),
        summary_log([
            encode_event(1_577_836_800.0, 0, &[("loss", 2.0)]),
            encode_event(1_577_836_860.0, 100, &[("loss", 0.5)]),
        ]),
    )
    .unwrap();

    let board = RunBoard::new(
        FileStorage::open(runs_dir.path()).unwrap(),
        MemoryRecordStore::new(),
        DirectoryArtifactStore::new(artifacts_dir.path()),
    );

    let cursor = board.get_runs(&RunQuery::all()).unwrap();
    assert_eq!(cursor.count(), 1);
    let run = cursor.iter().next().unwrap().unwrap();
    assert_eq!(run.config["lr"], json!(0.1));
    assert_eq!(run.record["status"], json!("COMPLETED"));

    let same = board.get_run(&run.id).unwrap().unwrap();
    assert_eq!(same.id, run.id);

    let metric = board.get_metric(&run.id, "tfsummary_events1_loss").unwrap();
    assert_eq!(metric.run_id, run.id);
    assert_eq!(metric.steps, vec![0, 100]);
    assert_eq!(metric.values, vec![2.0, 0.5]);

    assert!(board.get_metric(&run.id, "bogus").unwrap_err().is_not_found());
    assert!(board.get_run("0000000").unwrap().is_none());
    assert!(board.file_storage().root().is_absolute());
}
