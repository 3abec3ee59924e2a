//! Error taxonomy for botsup, following spec.md §7's error classes.
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON or does not match the schema.
    #[error("invalid config JSON in {path}: {source}")]
    Parse {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Two jobs declared the same name.
    #[error("duplicate job name '{0}'")]
    DuplicateName(String),

    /// A job's command resolved to an empty argument vector.
    #[error("job '{0}' has an empty command")]
    EmptyArgv(String),

    /// A job specified both `command` and `program`/`args`, or neither.
    #[error("job '{0}' must specify either `command` or `program`")]
    AmbiguousCommand(String),

    /// A numeric interval setting was not strictly positive.
    #[error("{field} must be greater than zero, got {value}")]
    NonPositiveInterval {
        /// Name of the offending field.
        field: &'static str,
        /// The value that was rejected.
        value: f64,
    },
}

/// Errors raised by the Atomic File Store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure while writing, renaming, or reading a file.
    #[error("atomic store I/O failed for {path}: {source}")]
    Io {
        /// Path being operated on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// All bounded retries were exhausted while writing.
    #[error("exhausted {attempts} retries writing {path}: {source}")]
    RetriesExhausted {
        /// Path being operated on.
        path: PathBuf,
        /// Number of attempts made.
        attempts: u32,
        /// Final underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the Instance Lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// I/O failure manipulating the lock file.
    #[error("instance lock I/O failed for {path}: {source}")]
    Io {
        /// Path of the lock file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The lock is held by a live process.
    #[error("instance lock at {path} is held by live pid {holder_pid}")]
    Busy {
        /// Path of the lock file.
        path: PathBuf,
        /// pid recorded in the lock file.
        holder_pid: u32,
    },
}

/// Errors raised by the Worker process wrapper.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The child process could not be spawned.
    #[error("failed to spawn job '{job}' ({program}): {source}")]
    Spawn {
        /// Job name.
        job: String,
        /// Program path that failed to spawn.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The job's log file could not be opened.
    #[error("failed to open log file {path} for job '{job}': {source}")]
    LogOpen {
        /// Job name.
        job: String,
        /// Log file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Sending a termination request to the child failed.
    #[error("failed to signal job '{job}' (pid {pid}): {source}")]
    Signal {
        /// Job name.
        job: String,
        /// Process id.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Top-level errors raised by the Supervisor control loop.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Config error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Atomic File Store error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Instance Lock error.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Worker error.
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// Generic I/O error not covered above.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the Daemon Driver, reusing the same taxonomy.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Config error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Atomic File Store error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Instance Lock error.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Worker error.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
