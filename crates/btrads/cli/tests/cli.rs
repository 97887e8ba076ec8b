//! End-to-end tests of the `btrads` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn btrads() -> Command {
    let mut cmd = Command::cargo_bin("btrads").unwrap();
    cmd.env_remove("BTRADS_CONFIG").env_remove("RUST_LOG");
    cmd
}

fn json_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const IMPROVED: &str = r#"{
    "patient_id": "p-001",
    "flair_change_pct": -48.0,
    "enhancement_change_pct": -25.0,
    "ground_truth": "1a"
}"#;

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn assess_with_rules_only() {
    let patient = json_file(IMPROVED);
    let result = stdout_json(
        btrads()
            .args(["-o", "json", "assess", "--extractor", "rules"])
            .arg(patient.path()),
    );

    assert_eq!(result["score"], "1a");
    assert_eq!(result["status"], "completed");
    assert_eq!(result["ground_truth"], "1a");
    // prior and medications have no rule and fall back
    assert_eq!(result["annotations"].as_array().unwrap().len(), 2);
}

#[test]
fn assess_with_keywords_table() {
    let patient = json_file(
        r#"{
            "patient_id": "p-009",
            "clinical_note": "MRI compared to prior study. Patient continuing Avastin, first study after start.",
            "flair_change_pct": -35.0,
            "enhancement_change_pct": -40.0
        }"#,
    );
    btrads()
        .arg("assess")
        .arg(patient.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("BT-RADS Assessment"))
        .stdout(predicate::str::contains("BT-1b"))
        .stdout(predicate::str::contains("node_3b_avastin_response"));
}

#[test]
fn review_correction_reroutes_case() {
    let patient = json_file(IMPROVED);
    let result = stdout_json(
        btrads()
            .args(["-o", "json", "assess", "--extractor", "rules", "--review", "--validator", "dr_smith"])
            .arg(patient.path())
            .write_stdin("unchanged\n"),
    );

    assert_eq!(result["score"], "2");
    assert_eq!(result["total_validations"], 1);
    assert_eq!(result["modifications_made"], 1);
}

#[test]
fn review_accepts_on_empty_line() {
    let patient = json_file(IMPROVED);
    let result = stdout_json(
        btrads()
            .args(["-o", "json", "assess", "--extractor", "rules", "--review"])
            .arg(patient.path())
            .write_stdin("\n"),
    );

    assert_eq!(result["score"], "1a");
    assert_eq!(result["total_validations"], 1);
    assert_eq!(result["modifications_made"], 0);
}

#[test]
fn missing_patient_file_fails() {
    btrads()
        .args(["assess", "/nonexistent/patient.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn batch_reports_accuracy() {
    let records = json_file(
        r#"[
            {"patient_id": "a", "flair_change_pct": -48.0, "enhancement_change_pct": -25.0, "ground_truth": "1a"},
            {"patient_id": "b", "flair_change_pct": 2.0, "enhancement_change_pct": -3.0, "ground_truth": "3b"}
        ]"#,
    );
    let report = stdout_json(
        btrads()
            .args(["-o", "json", "batch", "--extractor", "rules", "--concurrency", "2"])
            .arg(records.path()),
    );

    assert_eq!(report["results"][0]["patient_id"], "a");
    assert_eq!(report["results"][1]["score"], "2");
    assert_eq!(report["summary"]["total"], 2);
    assert_eq!(report["summary"]["agreements"], 1);
    assert_eq!(report["summary"]["accuracy"], 0.5);
}

#[test]
fn batch_rejects_zero_concurrency() {
    let records = json_file("[]");
    btrads()
        .args(["batch", "--concurrency", "0"])
        .arg(records.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn exported_graph_validates() {
    let exported = btrads()
        .args(["graph", "export"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let file = json_file(&String::from_utf8(exported).unwrap());

    btrads()
        .args(["graph", "validate"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("bt-rads is valid: 17 nodes, 8 terminals"));
}

#[test]
fn broken_graph_is_rejected() {
    let file = json_file(r#"{"name": "broken", "entry": "start", "nodes": []}"#);
    btrads()
        .args(["graph", "validate"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn rules_evaluate_reports_each_rule() {
    let verdicts = stdout_json(btrads().args([
        "-o",
        "json",
        "rules",
        "evaluate",
        "--flair-pct",
        "45",
        "--enh-pct",
        "50",
        "--followup-date",
        "2024-03-01",
        "--radiation-date",
        "2024-01-15",
    ]));

    let keys: Vec<&str> = verdicts
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, ["worse", "within_90_days", "flair_and_enh", "major"]);
}

#[test]
fn rules_timing_accepts_negative_days() {
    btrads()
        .args(["rules", "timing", "-5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unknown"));
}

#[test]
fn environment_overrides_config() {
    let config = stdout_json(
        btrads()
            .args(["-o", "json", "config"])
            .env("BTRADS_BATCH__CONCURRENCY", "7"),
    );
    assert_eq!(config["batch"]["concurrency"], 7);
    assert_eq!(config["extraction"]["max_attempts"], 3);
}
