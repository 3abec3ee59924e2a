//! Instance Lock: ensures at most one Supervisor/Daemon writes a given state
//! file (spec.md §4.2). Grounded in the pack's daemon-lockfile pattern
//! (`O_CREAT|O_EXCL` race-safe create, stale-pid reclaim), generalized to a
//! cross-platform liveness check via `sysinfo`.
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::LockError, runtime::pid_is_alive, store};

/// On-disk shape of the lock file (spec.md §3: "Instance Lock record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process id of the holder.
    pub pid: u32,
    /// When the holder acquired the lock.
    pub acquired_at: DateTime<Utc>,
    /// Free-form diagnostic tag (e.g. "supervisor" or "daemon").
    pub tag: String,
}

/// An acquired Instance Lock. Dropping it releases the lock if this process
/// still owns it (RAII guard, avoiding a leaked lock on an early return).
pub struct InstanceLockGuard {
    path: PathBuf,
}

impl InstanceLockGuard {
    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock immediately rather than waiting for `Drop`.
    pub fn release(self) -> Result<(), LockError> {
        let path = self.path.clone();
        std::mem::forget(self);
        release(&path)
    }
}

impl Drop for InstanceLockGuard {
    fn drop(&mut self) {
        if let Err(err) = release(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release instance lock on drop");
        }
    }
}

/// Attempts to claim the lock at `lock_path`. On success, writes a JSON
/// record via the Atomic File Store's exclusive-create path and returns a
/// guard that releases the lock when dropped.
pub fn acquire(lock_path: &Path, holder_tag: &str) -> Result<InstanceLockGuard, LockError> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|source| LockError::Io {
            path: lock_path.to_path_buf(),
            source,
        })?;
    }

    match try_create(lock_path, holder_tag) {
        Ok(()) => return Ok(InstanceLockGuard { path: lock_path.to_path_buf() }),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(source) => {
            return Err(LockError::Io {
                path: lock_path.to_path_buf(),
                source,
            })
        }
    }

    match read_record(lock_path)? {
        Some(record) if pid_is_alive(record.pid) => Err(LockError::Busy {
            path: lock_path.to_path_buf(),
            holder_pid: record.pid,
        }),
        _ => {
            let _ = fs::remove_file(lock_path);
            try_create(lock_path, holder_tag).map_err(|source| LockError::Io {
                path: lock_path.to_path_buf(),
                source,
            })?;
            Ok(InstanceLockGuard { path: lock_path.to_path_buf() })
        }
    }
}

fn try_create(lock_path: &Path, holder_tag: &str) -> io::Result<()> {
    let mut file = store::create_exclusive(lock_path)?;
    let record = LockRecord {
        pid: std::process::id(),
        acquired_at: Utc::now(),
        tag: holder_tag.to_string(),
    };
    let bytes = serde_json::to_vec_pretty(&record)
        .map_err(|source| io::Error::new(io::ErrorKind::InvalidData, source))?;
    file.write_all(&bytes)?;
    file.sync_all()
}

/// Reads the lock record at `lock_path`, treating a missing, empty, or
/// malformed file as "no record" rather than an error.
pub fn read_record(lock_path: &Path) -> Result<Option<LockRecord>, LockError> {
    match store::read(lock_path).map_err(|err| LockError::Io {
        path: lock_path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Other, err.to_string()),
    })? {
        store::ReadOutcome::NotYetAvailable => Ok(None),
        store::ReadOutcome::Present(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
    }
}

/// Removes the lock file only if its recorded holder matches this process.
pub fn release(lock_path: &Path) -> Result<(), LockError> {
    match read_record(lock_path)? {
        Some(record) if record.pid == std::process::id() => {
            match fs::remove_file(lock_path) {
                Ok(()) => Ok(()),
                Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(LockError::Io {
                    path: lock_path.to_path_buf(),
                    source,
                }),
            }
        }
        _ => Ok(()),
    }
}
