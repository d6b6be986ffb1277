//! Binary-level checks of the command line

use assert_cmd::Command;
use tempfile::TempDir;

fn archiver() -> Command {
    let mut cmd = Command::cargo_bin("tabular-archiver").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("LOG_FORMAT");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let output = archiver().arg("--help").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("resources"));
}

#[test]
fn test_resources_human_table() {
    let output = archiver().arg("resources").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("station-daily"));
    assert!(stdout.contains("station-10min"));
    assert!(stdout.contains("Total: 4 resource(s)"));
}

#[test]
fn test_resources_json() {
    let output = archiver()
        .args(["--output-format", "json", "resources"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let resources = value["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 4);
    assert_eq!(resources[0]["id"], "station-daily");
    assert_eq!(resources[0]["time_step_minutes"], 1440);
}

#[test]
fn test_resources_filter() {
    let output = archiver()
        .args(["--output-format", "json", "resources", "hourly"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["resources"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_requires_base_url() {
    let temp_dir = TempDir::new().unwrap();
    let output = archiver()
        .args(["run", "--resource", "station-daily", "--parameters", "tl"])
        .arg("--archive-root")
        .arg(temp_dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--base-url"));
}

#[test]
fn test_run_unknown_resource_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = archiver()
        .args([
            "--base-url",
            "http://127.0.0.1:9",
            "run",
            "--resource",
            "station-yearly",
            "--parameters",
            "tl",
        ])
        .arg("--archive-root")
        .arg(temp_dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("station-yearly"));
}

#[test]
fn test_run_rejects_zero_group_size() {
    let temp_dir = TempDir::new().unwrap();
    let output = archiver()
        .args([
            "run",
            "--resource",
            "station-daily",
            "--parameters",
            "tl",
            "--group-size",
            "0",
        ])
        .arg("--archive-root")
        .arg(temp_dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
}
