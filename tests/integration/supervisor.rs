//! End-to-end supervisor scenarios via the built binary (spec.md §8):
//! clean shutdown via `stop`, restart-then-give-up, instance lock busy,
//! and halt when all enabled jobs stop.
use std::{fs, time::Duration};

use assert_cmd::Command;
use tempfile::tempdir;

fn write_config(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("botsup.json");
    fs::write(&path, body).unwrap();
    path
}

fn wait_for_file(path: &std::path::Path, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

fn wait_for_exit(child: &mut std::process::Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    None
}

#[test]
fn stop_requests_clean_shutdown_of_a_running_supervisor() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{"jobs":[{"name":"tick","command":["sleep","30"],"restart":"always"}]}"#,
    );
    let state_file = dir.path().join("botsup.state.json");

    let mut run = Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
            "--poll-sec",
            "0.2",
            "--write-state-sec",
            "0.2",
        ])
        .spawn()
        .unwrap();

    assert!(wait_for_file(&state_file, Duration::from_secs(5)), "supervisor never wrote a snapshot");
    std::thread::sleep(Duration::from_millis(500));

    Command::cargo_bin("botsup")
        .unwrap()
        .args(["stop", "--state-file", state_file.to_str().unwrap()])
        .assert()
        .success();

    let status = wait_for_exit(&mut run, Duration::from_secs(10))
        .expect("supervisor should exit after stop is acknowledged");
    assert_eq!(status.code(), Some(0));
}

#[test]
fn second_supervisor_instance_exits_with_lock_busy() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{"jobs":[{"name":"tick","command":["sleep","30"],"restart":"never"}]}"#,
    );
    let state_file = dir.path().join("botsup.state.json");

    let mut first = Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
            "--poll-sec",
            "0.2",
        ])
        .spawn()
        .unwrap();
    assert!(wait_for_file(&state_file, Duration::from_secs(5)));

    let second = Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
            "--poll-sec",
            "0.2",
        ])
        .output()
        .unwrap();
    assert_eq!(second.status.code(), Some(3));

    Command::cargo_bin("botsup")
        .unwrap()
        .args(["stop", "--state-file", state_file.to_str().unwrap()])
        .assert()
        .success();
    let _ = wait_for_exit(&mut first, Duration::from_secs(10));
}

#[test]
fn halt_when_all_stopped_exits_nonzero_once_every_job_is_terminal() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{"jobs":[{"name":"once","command":["true"],"restart":"never"}]}"#,
    );
    let state_file = dir.path().join("botsup.state.json");

    let status = Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
            "--poll-sec",
            "0.1",
            "--halt-when-all-stopped",
        ])
        .timeout(Duration::from_secs(10))
        .output()
        .unwrap();
    assert_eq!(status.status.code(), Some(5));
}

#[test]
fn restart_then_give_up_disables_job_after_max_consecutive_failures() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{"jobs":[{
            "name":"flaky",
            "command":["false"],
            "restart":"on-failure",
            "max_consecutive_failures":3,
            "cooldown_base_sec":0,
            "cooldown_cap_sec":0
        }]}"#,
    );
    let state_file = dir.path().join("botsup.state.json");

    let status = Command::cargo_bin("botsup")
        .unwrap()
        .args([
            "run",
            "--config",
            config.to_str().unwrap(),
            "--state-file",
            state_file.to_str().unwrap(),
            "--poll-sec",
            "0.1",
            "--halt-on-job-failure",
        ])
        .timeout(Duration::from_secs(10))
        .output()
        .unwrap();
    assert_eq!(status.status.code(), Some(4));
}
