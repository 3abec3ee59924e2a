//! CLI-surface smoke tests (spec.md §6): bad config, missing snapshot,
//! and stop against an absent snapshot each map to their documented exit
//! codes.
use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn run_with_missing_config_exits_bad_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("does-not-exist.json");
    let state_file = dir.path().join("botsup.state.json");

    Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
        ])
        .assert()
        .code(2);
}

#[test]
fn run_with_invalid_json_exits_bad_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("botsup.json");
    fs::write(&config, "{not valid json").unwrap();
    let state_file = dir.path().join("botsup.state.json");

    Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
        ])
        .assert()
        .code(2);
}

#[test]
fn status_against_missing_snapshot_exits_bad_config() {
    let dir = tempdir().unwrap();
    let state_file = dir.path().join("botsup.state.json");

    Command::cargo_bin("botsup")
        .unwrap()
        .args(["status", "--state-file", state_file.to_str().unwrap()])
        .assert()
        .code(2);
}

#[test]
fn stop_against_missing_snapshot_exits_bad_config() {
    let dir = tempdir().unwrap();
    let state_file = dir.path().join("botsup.state.json");

    Command::cargo_bin("botsup")
        .unwrap()
        .args(["stop", "--state-file", state_file.to_str().unwrap()])
        .assert()
        .code(2);
}

#[test]
fn status_json_flag_emits_parseable_json() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("botsup.json");
    fs::write(&config, r#"{"jobs":[{"name":"tick","command":["true"]}]}"#).unwrap();
    let state_file = dir.path().join("botsup.state.json");

    Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
            "--halt-when-all-stopped",
            "--poll-sec",
            "0.1",
        ])
        .timeout(std::time::Duration::from_secs(10))
        .assert();

    Command::cargo_bin("botsup")
        .unwrap()
        .args(["status", "--state-file", state_file.to_str().unwrap(), "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("schema_version"));
}
