//! Supervisor state snapshot schema and rendering (spec.md §3, §6). `status`
//! and `stop` never construct a [`crate::supervisor::Supervisor`]; they only
//! read or rewrite this schema through the Atomic File Store.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::constants::SCHEMA_VERSION;

/// Current lifecycle phase of one supervised job (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    /// Declared but not yet scheduled to start.
    Pending,
    /// Spawn has been requested but the child's pid is not yet confirmed.
    Starting,
    /// The child is alive and has not been asked to stop.
    Running,
    /// `request_stop` has been sent; awaiting exit or the grace deadline.
    Stopping,
    /// Last exit was clean (code 0).
    ExitedOk,
    /// Last exit was non-zero or abnormal.
    ExitedFail,
    /// Waiting for the backoff window to elapse before the next start.
    CoolingDown,
    /// Permanently retired after exceeding `max_consecutive_failures`.
    DisabledByPolicy,
    /// Terminal: the supervisor halted and will not restart this job again.
    Halted,
}

/// Per-job runtime state carried in the snapshot (spec.md §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job name, matching the config entry.
    pub name: String,
    /// Whether the job is enabled in the current config.
    pub enabled: bool,
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Process id, while running.
    pub pid: Option<u32>,
    /// Exit code of the most recent run.
    pub last_exit_code: Option<i32>,
    /// When the job was most recently started.
    pub last_started_at: Option<DateTime<Utc>>,
    /// When the job most recently exited.
    pub last_exited_at: Option<DateTime<Utc>>,
    /// Current run of consecutive failures.
    pub consecutive_failures: u32,
    /// Total restarts since supervisor boot.
    pub restart_count: u32,
}

impl JobSnapshot {
    /// A freshly scheduled, not-yet-started job entry.
    pub fn pending(name: String, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            phase: Phase::Pending,
            pid: None,
            last_exit_code: None,
            last_started_at: None,
            last_exited_at: None,
            consecutive_failures: 0,
            restart_count: 0,
        }
    }
}

/// Aggregate counters derived from the per-job table each tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Total number of configured jobs.
    pub jobs_total: u32,
    /// Jobs with `enabled = true`.
    pub jobs_enabled: u32,
    /// Jobs currently in phase `running` or `starting`.
    pub jobs_running: u32,
    /// Jobs currently in phase `exited-fail` or `disabled-by-policy`.
    pub jobs_failed: u32,
}

impl Counters {
    /// Recomputes counters from the current job table.
    pub fn compute(jobs: &BTreeMap<String, JobSnapshot>) -> Self {
        let mut counters = Counters::default();
        for job in jobs.values() {
            counters.jobs_total += 1;
            if job.enabled {
                counters.jobs_enabled += 1;
            }
            match job.phase {
                Phase::Starting | Phase::Running => counters.jobs_running += 1,
                Phase::ExitedFail | Phase::DisabledByPolicy => counters.jobs_failed += 1,
                _ => {}
            }
        }
        counters
    }
}

/// The full on-disk state document (spec.md §3, §6). Shared, bit-exact,
/// shape between the Supervisor and the Daemon Driver (the daemon's `jobs`
/// map always has exactly one entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSnapshot {
    /// Schema version; starts at 1 and only changes on a breaking format change.
    pub schema_version: u32,
    /// Process id of the writing supervisor/daemon.
    pub supervisor_pid: u32,
    /// Token fixed per process start; changes across restarts.
    pub boot_nonce: String,
    /// When this supervisor/daemon instance started.
    pub started_at: DateTime<Utc>,
    /// Path to the config file in effect.
    pub config_path: String,
    /// Set by an external `stop` invocation; cleared on every fresh startup.
    pub stop_requested: bool,
    /// Per-job runtime state, keyed implicitly by `JobSnapshot::name`.
    pub jobs: Vec<JobSnapshot>,
    /// Aggregate counters.
    pub counters: Counters,
    /// Daemon-only: local time of the most recent fire attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fire_at: Option<DateTime<Utc>>,
    /// Daemon-only: local time of the next scheduled fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl SupervisorSnapshot {
    /// Builds a fresh snapshot at startup with every job in phase `pending`.
    pub fn new(supervisor_pid: u32, boot_nonce: String, config_path: String, jobs: Vec<JobSnapshot>) -> Self {
        let counters = Counters::compute(&jobs.iter().map(|j| (j.name.clone(), j.clone())).collect());
        Self {
            schema_version: SCHEMA_VERSION,
            supervisor_pid,
            boot_nonce,
            started_at: Utc::now(),
            config_path,
            stop_requested: false,
            jobs,
            counters,
            last_fire_at: None,
            next_fire_at: None,
        }
    }

    /// Recomputes `counters` from the current `jobs` list.
    pub fn refresh_counters(&mut self) {
        let map: BTreeMap<String, JobSnapshot> =
            self.jobs.iter().map(|j| (j.name.clone(), j.clone())).collect();
        self.counters = Counters::compute(&map);
    }
}

/// Renders a human-readable table of the snapshot to a string (spec.md §6:
/// `status` prints a human-readable table plus, with `--json`, an embedded
/// JSON blob).
pub fn render_table(snapshot: &SupervisorSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "supervisor pid={} boot_nonce={} started_at={} stop_requested={}\n",
        snapshot.supervisor_pid, snapshot.boot_nonce, snapshot.started_at, snapshot.stop_requested
    ));
    out.push_str(&format!(
        "jobs: total={} enabled={} running={} failed={}\n",
        snapshot.counters.jobs_total,
        snapshot.counters.jobs_enabled,
        snapshot.counters.jobs_running,
        snapshot.counters.jobs_failed
    ));
    out.push_str(&format!(
        "{:<20} {:<8} {:<18} {:>6} {:>12} {:>8} {:>8}\n",
        "NAME", "ENABLED", "PHASE", "PID", "LAST_EXIT", "FAILS", "RESTARTS"
    ));
    for job in &snapshot.jobs {
        out.push_str(&format!(
            "{:<20} {:<8} {:<18} {:>6} {:>12} {:>8} {:>8}\n",
            job.name,
            job.enabled,
            job.phase.as_ref(),
            job.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            job.last_exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            job.consecutive_failures,
            job.restart_count,
        ));
    }
    out
}
