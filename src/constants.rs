//! Magic numbers and default values centralized for clarity, following the
//! teacher's convention of keeping tunables out of the logic that uses them.

use std::time::Duration;

/// Current on-disk snapshot schema version (spec.md §6, `schema_version`).
pub const SCHEMA_VERSION: u32 = 1;

/// Default main-loop poll interval.
pub const DEFAULT_POLL_SEC: f64 = 1.0;

/// Default snapshot persistence interval.
pub const DEFAULT_WRITE_STATE_SEC: f64 = 2.0;

/// Default grace window between cooperative stop and force-kill.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(15);

/// Minimum attempts the Atomic File Store must make before giving up a write.
pub const STORE_MIN_RETRIES: u32 = 5;

/// Base sleep between Atomic File Store write retries, before jitter.
pub const STORE_RETRY_BASE: Duration = Duration::from_millis(15);

/// Upper bound for the jitter added to each retry sleep.
pub const STORE_RETRY_JITTER: Duration = Duration::from_millis(20);

/// Default backoff floor/base when a job config omits `cooldown_base_sec`.
pub const DEFAULT_COOLDOWN_BASE_SEC: u64 = 1;

/// Default backoff cap when a job config omits `cooldown_cap_sec`.
pub const DEFAULT_COOLDOWN_CAP_SEC: u64 = 60;

/// Interval at which the daemon re-checks monotonic time for its next fire,
/// tolerating clock jumps and suspend/resume.
pub const DAEMON_WAKE_GRANULARITY: Duration = Duration::from_secs(1);

/// Default directory fragment under which per-job logs are created when a
/// job does not specify `log_file` (spec.md §6: `logs/<name>.log`).
pub const DEFAULT_LOG_DIR: &str = "logs";

// Exit codes (spec.md §6).

/// Clean exit: external stop, deadline, or clean daemon retirement.
pub const EXIT_CLEAN: i32 = 0;
/// Missing or invalid configuration.
pub const EXIT_BAD_CONFIG: i32 = 2;
/// Instance lock held by another live process.
pub const EXIT_LOCK_BUSY: i32 = 3;
/// `halt_on_job_failure` triggered.
pub const EXIT_HALT_ON_FAILURE: i32 = 4;
/// `halt_when_all_stopped` triggered.
pub const EXIT_HALT_ALL_STOPPED: i32 = 5;
/// Unrecoverable internal error.
pub const EXIT_INTERNAL_ERROR: i32 = 6;
/// Daemon-only: all retries exhausted.
pub const EXIT_RETRIES_EXHAUSTED: i32 = 7;
