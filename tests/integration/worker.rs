//! Integration coverage for the Worker's spawn/stop/kill lifecycle
//! (spec.md §4.3, §8).
use std::{
    collections::BTreeMap,
    sync::mpsc::sync_channel,
    time::Duration,
};

use botsup::{
    config::{JobSpec, RestartPolicy},
    worker,
};
use tempfile::tempdir;

fn long_running_job(dir: &std::path::Path) -> JobSpec {
    JobSpec {
        name: "sleeper".to_string(),
        enabled: true,
        program: "sleep".to_string(),
        args: vec!["30".to_string()],
        cwd: None,
        env: BTreeMap::new(),
        log_file: dir.join("sleeper.log"),
        restart: RestartPolicy::Never,
        max_consecutive_failures: 0,
        cooldown_base_sec: 1,
        cooldown_cap_sec: 60,
        max_run_seconds: None,
    }
}

#[test]
fn request_stop_terminates_a_long_running_job() {
    let dir = tempdir().unwrap();
    let job = long_running_job(dir.path());
    let (tx, _rx) = sync_channel(16);

    let mut handle = worker::start(&job, tx).unwrap();
    assert!(worker::try_wait(&mut handle).is_none());

    worker::request_stop(&mut handle).unwrap();

    let mut record = None;
    for _ in 0..50 {
        if let Some(r) = worker::try_wait(&mut handle) {
            record = Some(r);
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    let record = record.expect("job should exit after SIGTERM within 5s");
    assert_eq!(record.cause, worker::ExitCause::StopRequested);
}

#[test]
fn kill_now_forces_termination_of_an_unresponsive_job() {
    let dir = tempdir().unwrap();
    let job = long_running_job(dir.path());
    let (tx, _rx) = sync_channel(16);

    let mut handle = worker::start(&job, tx).unwrap();
    worker::kill_now(&mut handle).unwrap();
    let record = worker::wait(handle);
    assert_eq!(record.cause, worker::ExitCause::KilledAfterGrace);
}

#[test]
fn try_wait_is_non_blocking_while_job_runs() {
    let dir = tempdir().unwrap();
    let job = long_running_job(dir.path());
    let (tx, _rx) = sync_channel(16);

    let mut handle = worker::start(&job, tx).unwrap();
    let started = std::time::Instant::now();
    assert!(worker::try_wait(&mut handle).is_none());
    assert!(started.elapsed() < Duration::from_millis(500));

    worker::kill_now(&mut handle).unwrap();
    let _ = worker::wait(handle);
}
