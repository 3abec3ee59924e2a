//! Daemon Driver: fires one worker execution per calendar boundary ("daily
//! at HH:MM" local time) instead of relying on an OS scheduler (spec.md
//! §4.5). Shares `Worker`, `InstanceLock`, and the Atomic File Store with
//! the Supervisor; its snapshot reuses the same schema with exactly one
//! job entry.
use std::{
    path::PathBuf,
    sync::mpsc::sync_channel,
    thread,
    time::{Duration, Instant},
};

use chrono::{Local, NaiveTime, TimeZone};
use tracing::{info, warn};

use crate::{
    config::JobSpec,
    constants::{EXIT_CLEAN, EXIT_RETRIES_EXHAUSTED},
    error::DaemonError,
    lock,
    runtime::fresh_boot_nonce,
    status::{JobSnapshot, Phase, SupervisorSnapshot},
    store,
    worker,
};

/// Options controlling one daemon run.
pub struct DaemonOptions {
    /// Path to the config file in effect (recorded in the snapshot only).
    pub config_path: PathBuf,
    /// Path where the single-job snapshot is persisted.
    pub state_file: PathBuf,
    /// Path to the Instance Lock file.
    pub lock_file: PathBuf,
    /// Local wall-clock hour to fire at.
    pub fire_hour: u32,
    /// Local wall-clock minute to fire at.
    pub fire_minute: u32,
    /// Fire immediately on startup in addition to the schedule.
    pub run_on_start: bool,
    /// Delay before retrying after a failed fire.
    pub retry_delay: Duration,
    /// Consecutive failures before pausing retries.
    pub max_consecutive_failures: u32,
    /// Optional cap on a single fire's wall-clock duration.
    pub max_run_seconds: Option<u64>,
    /// Wake/poll cadence used while waiting for the next fire.
    pub wake_granularity: Duration,
    /// Passed through to the fired job as `BOTSUP_SKIP_REFRESH=1`.
    pub skip_refresh: bool,
}

/// Drives `job_spec` on the configured schedule until interrupted, returning
/// a process exit code.
pub fn run(options: DaemonOptions, job_spec: JobSpec) -> Result<i32, DaemonError> {
    let _lock_guard = lock::acquire(&options.lock_file, "daemon")?;

    let mut snapshot = SupervisorSnapshot::new(
        std::process::id(),
        fresh_boot_nonce(),
        options.config_path.display().to_string(),
        vec![JobSnapshot::pending(job_spec.name.clone(), job_spec.enabled)],
    );
    snapshot.next_fire_at = Some(next_fire_instant(options.fire_hour, options.fire_minute, None));
    store::write_json(&options.state_file, &snapshot)?;

    let interrupted = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let interrupted_for_handler = interrupted.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        interrupted_for_handler.store(true, std::sync::atomic::Ordering::SeqCst);
    }) {
        warn!(error = %err, "failed to install interrupt handler");
    }

    let mut consecutive_failures: u32 = 0;
    let mut last_fired_date = None;

    if options.run_on_start {
        let outcome = fire(&options, &job_spec, &mut snapshot)?;
        last_fired_date = Some(Local::now().date_naive());
        consecutive_failures = if outcome { 0 } else { consecutive_failures + 1 };
        snapshot.next_fire_at = Some(next_fire_instant(
            options.fire_hour,
            options.fire_minute,
            last_fired_date,
        ));
        store::write_json(&options.state_file, &snapshot)?;
    }

    loop {
        if interrupted.load(std::sync::atomic::Ordering::SeqCst) {
            info!("daemon exiting cleanly on interrupt");
            return Ok(EXIT_CLEAN);
        }

        if consecutive_failures >= options.max_consecutive_failures
            && options.max_consecutive_failures != 0
        {
            warn!("daemon exhausted retries, exiting");
            return Ok(EXIT_RETRIES_EXHAUSTED);
        }

        let next_fire = next_fire_instant(options.fire_hour, options.fire_minute, last_fired_date);
        snapshot.next_fire_at = Some(next_fire);

        let now = Local::now();
        if now >= next_fire {
            let outcome = fire(&options, &job_spec, &mut snapshot)?;
            last_fired_date = Some(Local::now().date_naive());
            consecutive_failures = if outcome { 0 } else { consecutive_failures + 1 };
            if !outcome && options.retry_delay > Duration::ZERO {
                thread::sleep(options.retry_delay);
            }
            store::write_json(&options.state_file, &snapshot)?;
            continue;
        }

        thread::sleep(options.wake_granularity);
    }
}

/// Computes the next local-time `HH:MM` instant, skipping today's boundary
/// if it has already been consumed by a fire earlier this calendar day.
fn next_fire_instant(
    hour: u32,
    minute: u32,
    last_fired_date: Option<chrono::NaiveDate>,
) -> chrono::DateTime<Local> {
    let now = Local::now();
    let today = now.date_naive();
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap());

    let candidate_today = Local
        .from_local_datetime(&today.and_time(time))
        .single()
        .unwrap_or(now);

    let already_consumed_today = last_fired_date == Some(today);

    if !already_consumed_today && candidate_today > now {
        candidate_today
    } else {
        let tomorrow = today.succ_opt().unwrap_or(today);
        Local
            .from_local_datetime(&tomorrow.and_time(time))
            .single()
            .unwrap_or(candidate_today + chrono::Duration::days(1))
    }
}

/// Spawns one Worker execution of `job_spec`, waits for completion or the
/// per-fire deadline, and records the outcome into `snapshot`. Returns
/// `true` on a clean (exit code 0) fire.
fn fire(
    options: &DaemonOptions,
    job_spec: &JobSpec,
    snapshot: &mut SupervisorSnapshot,
) -> Result<bool, DaemonError> {
    info!(job = %job_spec.name, "daemon firing job");
    snapshot.last_fire_at = Some(chrono::Utc::now());

    let fired_spec = if options.skip_refresh {
        let mut spec = job_spec.clone();
        spec.env.insert("BOTSUP_SKIP_REFRESH".to_string(), "1".to_string());
        spec
    } else {
        job_spec.clone()
    };

    let (events_tx, _events_rx) = sync_channel(16);
    let mut handle = worker::start(&fired_spec, events_tx)?;

    let deadline = options
        .max_run_seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let record = loop {
        if let Some(record) = worker::try_wait(&mut handle) {
            break record;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                warn!(job = %job_spec.name, "fire exceeded max_run_seconds, killing");
                worker::kill_now(&mut handle)?;
                break worker::wait(handle);
            }
        }
        thread::sleep(Duration::from_millis(200));
    };

    let clean = record.exit_code == Some(0);
    if let Some(job) = snapshot.jobs.first_mut() {
        job.pid = None;
        job.last_exit_code = record.exit_code;
        job.last_exited_at = Some(chrono::Utc::now());
        job.phase = if clean { Phase::ExitedOk } else { Phase::ExitedFail };
        if clean {
            job.consecutive_failures = 0;
        } else {
            job.consecutive_failures += 1;
        }
        job.restart_count += 1;
    }
    snapshot.refresh_counters();

    Ok(clean)
}
