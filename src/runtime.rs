//! Runtime path defaults and small host-facing helpers shared by every component.
use std::{
    env,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use sysinfo::{Pid, System};

/// Default config path used when neither `--config` nor `BOTSUP_CONFIG` is set.
pub const DEFAULT_CONFIG_FILE: &str = "botsup.json";

/// Resolves the config path from a CLI override, falling back to `BOTSUP_CONFIG`,
/// then to [`DEFAULT_CONFIG_FILE`].
pub fn resolve_config_path(cli_value: Option<&str>) -> PathBuf {
    if let Some(path) = cli_value {
        return PathBuf::from(path);
    }
    if let Ok(path) = env::var("BOTSUP_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Resolves an optional `f64` seconds setting from a CLI override or environment variable.
pub fn resolve_seconds_env(cli_value: Option<f64>, var: &str) -> Option<f64> {
    cli_value.or_else(|| env::var(var).ok().and_then(|v| v.parse().ok()))
}

/// Checks whether a process with the given pid is currently alive. Local-only,
/// never makes a network call, and works the same way on Windows and Unix.
pub fn pid_is_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_some()
}

/// Generates a fresh boot nonce: a short hex token unique enough to let external
/// callers detect that a supervisor has restarted. Derived from the process id,
/// wall-clock nanoseconds, and a process-local counter — no RNG dependency needed
/// for a value that only has to be distinct across *this process's* restarts.
pub fn fresh_boot_nonce() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    format!("{:016x}{:08x}{:04x}", nanos, pid, counter & 0xffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(pid_is_alive(std::process::id()));
    }

    #[test]
    fn implausible_pid_is_not_alive() {
        assert!(!pid_is_alive(u32::MAX - 1));
    }

    #[test]
    fn boot_nonces_are_distinct() {
        let a = fresh_boot_nonce();
        let b = fresh_boot_nonce();
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_config_path_prefers_cli_override() {
        assert_eq!(
            resolve_config_path(Some("/tmp/foo.json")),
            PathBuf::from("/tmp/foo.json")
        );
    }
}
