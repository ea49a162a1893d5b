//! End-to-end runs of the `sample` binary.

use std::fs;
use std::path::Path;
use std::process::Command;

use sieve::common::{DatasetLayout, NUM_RATING_SHARDS};

const NOTES: &str = "noteId\tnoteAuthorParticipantId\nN1\tA1\nN2\tA2\n";
const RATINGS_HEADER: &str = "noteId\traterParticipantId\n";
const STATUS: &str = "noteId\tcurrentStatus\nN1\tHELPFUL\n";
const ENROLLMENT: &str = "participantId\tenrollmentState\nA1\tnew\nU1\tearned\n";

fn write_dataset(root: &Path) -> DatasetLayout {
    let layout = DatasetLayout::new(root);
    fs::create_dir_all(layout.ratings_dir()).unwrap();
    fs::write(layout.notes(), NOTES).unwrap();
    for i in 0..NUM_RATING_SHARDS {
        let rows = if i == 0 { "N1\tU1\nN2\tU1\n" } else { "" };
        fs::write(layout.rating_shard(i), format!("{RATINGS_HEADER}{rows}")).unwrap();
    }
    fs::write(layout.status_history(), STATUS).unwrap();
    fs::write(layout.user_enrollment(), ENROLLMENT).unwrap();
    layout
}

fn header(text: &str) -> String {
    format!("{}\n", text.lines().next().unwrap())
}

#[test]
fn test_negative_sample_writes_headers_only() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(&dir.path().join("input"));
    let output = DatasetLayout::new(dir.path().join("input-sample"));

    let status = Command::new(env!("CARGO_BIN_EXE_sample"))
        .arg("--input-dir")
        .arg(dir.path().join("input"))
        .arg("--output-dir")
        .arg(output.root())
        .args(["--sample=-1", "--quiet"])
        .status()
        .unwrap();
    assert!(status.success(), "{status:?}");

    assert_eq!(fs::read_to_string(output.notes()).unwrap(), header(NOTES));
    for shard in output.rating_shards() {
        assert_eq!(fs::read_to_string(shard).unwrap(), RATINGS_HEADER);
    }
    assert_eq!(
        fs::read_to_string(output.status_history()).unwrap(),
        header(STATUS)
    );
    assert_eq!(
        fs::read_to_string(output.user_enrollment()).unwrap(),
        header(ENROLLMENT)
    );
}

#[test]
fn test_ranked_run_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(&dir.path().join("input"));
    let output = DatasetLayout::new(dir.path().join("input-sample"));
    let report_path = dir.path().join("report.json");

    let status = Command::new(env!("CARGO_BIN_EXE_sample"))
        .arg("--input-dir")
        .arg(dir.path().join("input"))
        .arg("--output-dir")
        .arg(output.root())
        .args(["--policy", "ranked", "--sample", "1", "--user-sample", "1", "--quiet"])
        .arg("--report")
        .arg(&report_path)
        .status()
        .unwrap();
    assert!(status.success(), "{status:?}");

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["policy"], "ranked");
    assert_eq!(report["selected_notes"], 1);
    assert_eq!(report["selected_users"], 1);
    assert_eq!(
        fs::read_to_string(output.user_enrollment()).unwrap(),
        format!("{}U1\tearned\n", header(ENROLLMENT))
    );
}
