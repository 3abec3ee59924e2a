//! Integration coverage for the Instance Lock's single-instance guarantee
//! and stale-holder reclaim (spec.md §4.2, §8).
use botsup::{error::LockError, lock};
use tempfile::tempdir;

#[test]
fn second_instance_is_rejected_while_first_is_live() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("botsup.lock");

    let _first = lock::acquire(&path, "supervisor").unwrap();
    let second = lock::acquire(&path, "supervisor");

    match second {
        Err(LockError::Busy { holder_pid, .. }) => {
            assert_eq!(holder_pid, std::process::id());
        }
        other => panic!("expected Busy, got {other:?}"),
    }
}

#[test]
fn lock_is_reclaimable_after_release() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("botsup.lock");

    let first = lock::acquire(&path, "supervisor").unwrap();
    first.release().unwrap();

    let second = lock::acquire(&path, "supervisor").unwrap();
    second.release().unwrap();
    assert!(!path.exists());
}

#[test]
fn stale_pid_from_a_dead_process_is_reclaimed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("botsup.lock");

    let stale = lock::LockRecord {
        pid: u32::MAX - 1,
        acquired_at: chrono::Utc::now(),
        tag: "supervisor".to_string(),
    };
    std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

    let guard = lock::acquire(&path, "supervisor").unwrap();
    let record = lock::read_record(&path).unwrap().unwrap();
    assert_eq!(record.pid, std::process::id());
    guard.release().unwrap();
}
