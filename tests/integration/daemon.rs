//! End-to-end daemon scenario via the built binary (spec.md §8): daily fire
//! with `--run-on-start` produces a clean exit record on the first tick.
use std::{fs, time::Duration};

use assert_cmd::Command;
use tempfile::tempdir;

#[test]
fn run_on_start_fires_immediately_and_records_a_clean_exit() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("botsup.json");
    fs::write(
        &config_path,
        r#"{"jobs":[{"name":"report","command":["true"],"restart":"never"}]}"#,
    )
    .unwrap();
    let state_file = dir.path().join("botsup.daemon.json");

    let mut child = Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "daemon",
            "--config",
            config_path.to_str().unwrap(),
            "--job",
            "report",
            "--state-file",
            state_file.to_str().unwrap(),
            "--at",
            "23:59",
            "--run-on-start",
        ])
        .spawn()
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut saw_exit = false;
    while std::time::Instant::now() < deadline {
        if let Ok(body) = fs::read_to_string(&state_file) {
            if body.contains("\"last_exit_code\":0") || body.contains("exited-ok") {
                saw_exit = true;
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(saw_exit, "daemon never recorded the run-on-start fire");

    child.kill().ok();
    let _ = child.wait();
}

#[test]
fn daemon_rejects_an_unknown_job_name() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("botsup.json");
    fs::write(
        &config_path,
        r#"{"jobs":[{"name":"report","command":["true"]}]}"#,
    )
    .unwrap();
    let state_file = dir.path().join("botsup.daemon.json");

    Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "daemon",
            "--config",
            config_path.to_str().unwrap(),
            "--job",
            "does-not-exist",
            "--state-file",
            state_file.to_str().unwrap(),
            "--at",
            "09:00",
        ])
        .assert()
        .code(2);
}
