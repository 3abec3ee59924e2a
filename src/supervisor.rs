//! Supervisor: the main control loop (spec.md §4.4). Owns the job table,
//! applies the restart policy, aggregates worker lifecycle events into the
//! live snapshot, persists it through the Atomic File Store, and honors
//! external stop requests and global halt triggers.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::mpsc::{sync_channel, Receiver, SyncSender},
    thread,
    time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
    config::{Config, JobSpec, RestartPolicy},
    constants::{DEFAULT_GRACE, EXIT_CLEAN, EXIT_HALT_ALL_STOPPED, EXIT_HALT_ON_FAILURE},
    error::SupervisorError,
    lock::{self, InstanceLockGuard},
    runtime::fresh_boot_nonce,
    status::{JobSnapshot, Phase, SupervisorSnapshot},
    store,
    worker::{self, ExitCause, LifecycleEvent, WorkerHandle},
};

/// Options controlling one `run` invocation, mirroring the CLI surface of
/// spec.md §6.
pub struct SupervisorOptions {
    /// Path to the config file (already resolved).
    pub config_path: PathBuf,
    /// Path where the JSON snapshot is persisted.
    pub state_file: PathBuf,
    /// Path to the Instance Lock file.
    pub lock_file: PathBuf,
    /// Main-loop cadence.
    pub poll_interval: Duration,
    /// Snapshot-persistence cadence.
    pub write_state_interval: Duration,
    /// Optional overall run-time budget.
    pub run_seconds: Option<u64>,
    /// When true, no job is ever restarted regardless of its own policy.
    pub no_restart: bool,
    /// Halt (and exit nonzero) if any enabled job hits its failure ceiling.
    pub halt_on_job_failure: bool,
    /// Halt (and exit nonzero) once every enabled job is terminal.
    pub halt_when_all_stopped: bool,
}

/// Why the main loop broke out of its run.
enum StopReason {
    ExternalStop,
    RunSecondsElapsed,
    HaltOnJobFailure,
    HaltWhenAllStopped,
    Signal,
}

struct JobRuntime {
    spec: JobSpec,
    snapshot: JobSnapshot,
    handle: Option<WorkerHandle>,
    next_eligible_start: Option<Instant>,
}

/// The running supervisor instance.
pub struct Supervisor {
    options: SupervisorOptions,
    jobs: BTreeMap<String, JobRuntime>,
    snapshot: SupervisorSnapshot,
    events_tx: SyncSender<LifecycleEvent>,
    events_rx: Receiver<LifecycleEvent>,
    _lock_guard: InstanceLockGuard,
    interrupted: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Supervisor {
    /// Acquires the Instance Lock, loads the config, and prepares the
    /// initial job table and snapshot (spec.md §4.4 "Startup sequence").
    pub fn start(options: SupervisorOptions, config: Config) -> Result<Self, SupervisorError> {
        let lock_guard = lock::acquire(&options.lock_file, "supervisor")?;

        let mut jobs = BTreeMap::new();
        let mut job_snapshots = Vec::new();
        for (name, spec) in config.jobs {
            let snapshot = JobSnapshot::pending(name.clone(), spec.enabled);
            job_snapshots.push(snapshot.clone());
            jobs.insert(
                name,
                JobRuntime {
                    spec,
                    snapshot,
                    handle: None,
                    next_eligible_start: None,
                },
            );
        }

        let snapshot = SupervisorSnapshot::new(
            std::process::id(),
            fresh_boot_nonce(),
            options.config_path.display().to_string(),
            job_snapshots,
        );
        store::write_json(&options.state_file, &snapshot)?;

        let (events_tx, events_rx) = sync_channel(256);
        let interrupted = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let interrupted_for_handler = interrupted.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            interrupted_for_handler.store(true, std::sync::atomic::Ordering::SeqCst);
        }) {
            warn!(error = %err, "failed to install interrupt handler");
        }

        let mut supervisor = Self {
            options,
            jobs,
            snapshot,
            events_tx,
            events_rx,
            _lock_guard: lock_guard,
            interrupted,
        };

        for name in supervisor.enabled_job_names() {
            supervisor.start_job(&name);
        }

        Ok(supervisor)
    }

    fn enabled_job_names(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|(_, job)| job.spec.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn start_job(&mut self, name: &str) {
        let Some(job) = self.jobs.get_mut(name) else { return };
        job.snapshot.phase = Phase::Starting;
        match worker::start(&job.spec, self.events_tx.clone()) {
            Ok(handle) => {
                job.snapshot.pid = Some(handle.pid());
                job.snapshot.last_started_at = Some(chrono::Utc::now());
                job.snapshot.phase = Phase::Running;
                job.handle = Some(handle);
                info!(job = name, "job started");
            }
            Err(err) => {
                error!(job = name, error = %err, "failed to spawn job");
                job.snapshot.phase = Phase::ExitedFail;
                job.snapshot.last_exit_code = Some(-1);
                job.snapshot.last_exited_at = Some(chrono::Utc::now());
                job.snapshot.consecutive_failures += 1;
                job.handle = None;
            }
        }
    }

    /// Runs the main loop until a stop/halt condition is reached, then
    /// performs the shutdown sequence and returns the process exit code.
    pub fn run(mut self) -> i32 {
        let run_deadline = self
            .options
            .run_seconds
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut last_write = Instant::now();
        let stop_reason;

        loop {
            thread::sleep(self.options.poll_interval);

            self.reap_exited_jobs();
            self.apply_restart_policy();
            self.snapshot.refresh_counters();

            if last_write.elapsed() >= self.options.write_state_interval {
                if let Err(err) = store::write_json(&self.options.state_file, &self.snapshot) {
                    warn!(error = %err, "failed to persist snapshot, will retry next tick");
                } else {
                    last_write = Instant::now();
                }
            }

            if self.interrupted.load(std::sync::atomic::Ordering::SeqCst) {
                stop_reason = StopReason::Signal;
                break;
            }

            if self.external_stop_requested() {
                stop_reason = StopReason::ExternalStop;
                break;
            }

            if let Some(deadline) = run_deadline {
                if Instant::now() >= deadline {
                    stop_reason = StopReason::RunSecondsElapsed;
                    break;
                }
            }

            if self.options.halt_on_job_failure && self.any_job_disabled_by_policy() {
                stop_reason = StopReason::HaltOnJobFailure;
                break;
            }

            if self.options.halt_when_all_stopped && self.all_enabled_jobs_terminal() {
                stop_reason = StopReason::HaltWhenAllStopped;
                break;
            }
        }

        self.shutdown(stop_reason)
    }

    fn external_stop_requested(&mut self) -> bool {
        match store::read_json::<SupervisorSnapshot>(&self.options.state_file) {
            Ok(store::JsonReadOutcome::Present(on_disk)) => on_disk.stop_requested,
            _ => false,
        }
    }

    /// Drains pending log-progress events (the only kind workers currently
    /// emit) and reaps any worker whose child has exited, via a cheap
    /// non-blocking `try_wait` poll each tick rather than a dedicated
    /// reaper thread per child.
    fn reap_exited_jobs(&mut self) {
        while self.events_rx.try_recv().is_ok() {
            // Log-progress events are drained here so the bounded channel
            // never fills up; nothing in the control loop currently acts
            // on them beyond keeping the channel clear.
        }

        let names: Vec<String> = self.jobs.keys().cloned().collect();
        for name in names {
            self.reap_one(&name);
        }
    }

    fn reap_one(&mut self, name: &str) {
        let Some(runtime) = self.jobs.get_mut(name) else { return };
        let should_check = matches!(runtime.snapshot.phase, Phase::Running | Phase::Stopping);
        if !should_check {
            return;
        }
        let Some(handle) = runtime.handle.as_mut() else { return };
        let Some(record) = worker::try_wait(handle) else { return };
        runtime.handle = None;

        runtime.snapshot.pid = None;
        runtime.snapshot.last_exit_code = record.exit_code;
        runtime.snapshot.last_exited_at = Some(chrono::Utc::now());

        let clean = record.exit_code == Some(0) && record.cause == ExitCause::NaturalExit;
        if clean {
            runtime.snapshot.phase = Phase::ExitedOk;
            runtime.snapshot.consecutive_failures = 0;
        } else {
            runtime.snapshot.phase = Phase::ExitedFail;
            runtime.snapshot.consecutive_failures += 1;
        }
    }

    fn apply_restart_policy(&mut self) {
        let poll_floor = self.options.poll_interval;
        let names: Vec<String> = self.jobs.keys().cloned().collect();

        for name in names {
            let decision = {
                let runtime = self.jobs.get(&name).expect("name from own key set");
                restart_decision(runtime, self.options.no_restart, poll_floor)
            };

            let Some(runtime) = self.jobs.get_mut(&name) else { continue };
            match decision {
                RestartDecision::Respawn => {
                    runtime.snapshot.restart_count += 1;
                }
                RestartDecision::ScheduleCooldown(next_eligible) => {
                    runtime.snapshot.phase = Phase::CoolingDown;
                    runtime.next_eligible_start = Some(next_eligible);
                }
                RestartDecision::Disable => {
                    runtime.snapshot.phase = Phase::DisabledByPolicy;
                }
                RestartDecision::None => {}
            }

            if matches!(decision, RestartDecision::Respawn) {
                self.start_job(&name);
            }
        }
    }

    fn any_job_disabled_by_policy(&self) -> bool {
        self.jobs
            .values()
            .any(|job| job.spec.enabled && job.snapshot.phase == Phase::DisabledByPolicy)
    }

    fn all_enabled_jobs_terminal(&self) -> bool {
        self.jobs
            .values()
            .filter(|job| job.spec.enabled)
            .all(|job| {
                matches!(
                    job.snapshot.phase,
                    Phase::ExitedOk | Phase::ExitedFail | Phase::DisabledByPolicy | Phase::Halted
                ) && job.spec.restart == RestartPolicy::Never
            })
    }

    fn shutdown(mut self, reason: StopReason) -> i32 {
        for (name, runtime) in self.jobs.iter_mut() {
            if let Some(handle) = runtime.handle.as_mut() {
                runtime.snapshot.phase = Phase::Stopping;
                if let Err(err) = worker::request_stop(handle) {
                    warn!(job = name, error = %err, "failed to request cooperative stop");
                }
            }
        }

        let grace_deadline = Instant::now() + DEFAULT_GRACE;
        while Instant::now() < grace_deadline {
            let mut any_running = false;
            for runtime in self.jobs.values_mut() {
                if let Some(handle) = runtime.handle.as_mut() {
                    match worker::try_wait(handle) {
                        Some(record) => {
                            runtime.handle = None;
                            runtime.snapshot.pid = None;
                            runtime.snapshot.last_exit_code = record.exit_code;
                            runtime.snapshot.last_exited_at = Some(chrono::Utc::now());
                            runtime.snapshot.phase = if record.exit_code == Some(0) {
                                Phase::ExitedOk
                            } else {
                                Phase::ExitedFail
                            };
                        }
                        None => any_running = true,
                    }
                }
            }
            if !any_running {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        for (name, runtime) in self.jobs.iter_mut() {
            if let Some(handle) = runtime.handle.as_mut() {
                if let Err(err) = worker::kill_now(handle) {
                    warn!(job = name, error = %err, "failed to force-kill job after grace");
                }
                let record = worker::wait(runtime.handle.take().expect("handle present"));
                runtime.snapshot.pid = None;
                runtime.snapshot.last_exit_code = record.exit_code;
                runtime.snapshot.last_exited_at = Some(chrono::Utc::now());
                runtime.snapshot.phase = if record.exit_code == Some(0) {
                    Phase::ExitedOk
                } else {
                    Phase::ExitedFail
                };
            }
        }

        if matches!(reason, StopReason::HaltOnJobFailure) {
            for runtime in self.jobs.values_mut() {
                runtime.snapshot.phase = Phase::Halted;
            }
        }

        self.snapshot.jobs = self.jobs.values().map(|j| j.snapshot.clone()).collect();
        self.snapshot.refresh_counters();
        if let Err(err) = store::write_json(&self.options.state_file, &self.snapshot) {
            error!(error = %err, "failed to persist final snapshot");
        }

        match reason {
            StopReason::ExternalStop | StopReason::RunSecondsElapsed | StopReason::Signal => {
                info!("supervisor exiting cleanly");
                EXIT_CLEAN
            }
            StopReason::HaltOnJobFailure => {
                warn!("supervisor halted: job failure threshold reached");
                EXIT_HALT_ON_FAILURE
            }
            StopReason::HaltWhenAllStopped => {
                info!("supervisor halted: all enabled jobs stopped");
                EXIT_HALT_ALL_STOPPED
            }
        }
    }
}

enum RestartDecision {
    None,
    Respawn,
    ScheduleCooldown(Instant),
    Disable,
}

fn restart_decision(runtime: &JobRuntime, no_restart: bool, poll_floor: Duration) -> RestartDecision {
    if no_restart || runtime.spec.restart == RestartPolicy::Never {
        return RestartDecision::None;
    }

    match runtime.snapshot.phase {
        Phase::ExitedOk if runtime.spec.restart == RestartPolicy::Always => RestartDecision::Respawn,
        Phase::ExitedOk => RestartDecision::None,
        Phase::ExitedFail => {
            let max_failures = runtime.spec.max_consecutive_failures;
            if max_failures != 0 && runtime.snapshot.consecutive_failures >= max_failures {
                return RestartDecision::Disable;
            }
            let backoff = backoff_for(
                runtime.snapshot.consecutive_failures,
                runtime.spec.cooldown_base_sec,
                runtime.spec.cooldown_cap_sec,
            )
            .max(poll_floor);
            RestartDecision::ScheduleCooldown(Instant::now() + backoff)
        }
        Phase::CoolingDown => match runtime.next_eligible_start {
            Some(eligible) if Instant::now() >= eligible => RestartDecision::Respawn,
            _ => RestartDecision::None,
        },
        _ => RestartDecision::None,
    }
}

/// Computes the backoff curve `min(base * 2^(n-1), cap)`, floored at zero
/// duration for `n == 0` (spec.md §4.4).
pub fn backoff_for(consecutive_failures: u32, base_sec: u64, cap_sec: u64) -> Duration {
    if consecutive_failures == 0 {
        return Duration::from_secs(0);
    }
    let exponent = consecutive_failures.saturating_sub(1).min(32);
    let scaled = base_sec.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
    Duration::from_secs(scaled.min(cap_sec))
}

/// Loads the snapshot at `state_file`, if present.
pub fn load_snapshot(state_file: &Path) -> Result<Option<SupervisorSnapshot>, SupervisorError> {
    match store::read_json::<SupervisorSnapshot>(state_file)? {
        store::JsonReadOutcome::Present(snapshot) => Ok(Some(snapshot)),
        store::JsonReadOutcome::NotYetAvailable => Ok(None),
    }
}

/// Sets `stop_requested = true` on the on-disk snapshot, verifying first
/// that the recorded supervisor pid is still live (spec.md §6: `stop`).
pub fn request_external_stop(state_file: &Path) -> Result<StopOutcome, SupervisorError> {
    let Some(mut snapshot) = load_snapshot(state_file)? else {
        return Ok(StopOutcome::SnapshotAbsent);
    };

    if !crate::runtime::pid_is_alive(snapshot.supervisor_pid) {
        return Ok(StopOutcome::SupervisorNotLive);
    }

    snapshot.stop_requested = true;
    store::write_json(state_file, &snapshot)?;
    Ok(StopOutcome::Acknowledged)
}

/// Result of a `stop` CLI invocation (spec.md §6).
pub enum StopOutcome {
    /// `stop_requested` was set.
    Acknowledged,
    /// No snapshot exists at the given path.
    SnapshotAbsent,
    /// The recorded supervisor pid is not live; no write was made.
    SupervisorNotLive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_curve_is_nondecreasing_and_capped() {
        let mut previous = Duration::from_secs(0);
        for n in 1..10 {
            let current = backoff_for(n, 1, 16);
            assert!(current >= previous);
            assert!(current <= Duration::from_secs(16));
            previous = current;
        }
    }

    #[test]
    fn backoff_for_zero_failures_is_zero() {
        assert_eq!(backoff_for(0, 5, 60), Duration::from_secs(0));
    }

    #[test]
    fn backoff_caps_at_configured_ceiling() {
        assert_eq!(backoff_for(20, 1, 30), Duration::from_secs(30));
    }

    #[test]
    fn stop_against_missing_snapshot_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        assert!(matches!(
            request_external_stop(&state_file).unwrap(),
            StopOutcome::SnapshotAbsent
        ));
    }
}
