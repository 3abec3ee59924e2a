use std::{fs, path::PathBuf, process, time::Duration};

use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use botsup::{
    cli::{parse_args, Cli, Commands},
    config::load_config,
    constants::{
        DAEMON_WAKE_GRANULARITY, DEFAULT_WRITE_STATE_SEC, EXIT_BAD_CONFIG, EXIT_CLEAN,
        EXIT_INTERNAL_ERROR, EXIT_LOCK_BUSY, DEFAULT_LOG_DIR, DEFAULT_POLL_SEC,
    },
    daemon::{self, DaemonOptions},
    error::LockError,
    runtime::{resolve_config_path, resolve_seconds_env},
    status::render_table,
    supervisor::{self, Supervisor, SupervisorOptions, StopOutcome},
};

fn main() {
    let args = parse_args();

    let log_file_override = match &args.command {
        Commands::Run { log_file, .. } => log_file.clone(),
        _ => None,
    };
    init_logging(&args, log_file_override.as_deref());

    let exit_code = match args.command {
        Commands::Run { .. } => run_supervisor(args.command),
        Commands::Status { .. } => run_status(args.command),
        Commands::Stop { .. } => run_stop(args.command),
        Commands::Daemon { .. } => run_daemon(args.command),
    };

    process::exit(exit_code);
}

fn init_logging(args: &Cli, log_file_override: Option<&str>) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let log_path = match log_file_override {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(DEFAULT_LOG_DIR).join("supervisor.log"),
    };

    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(err) = fs::create_dir_all(parent) {
            eprintln!("failed to create log directory {parent:?}: {err}");
        }
    }

    let file = match fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open supervisor log file {log_path:?}: {err}");
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || file.try_clone().expect("log file handle clones"))
        .with_ansi(false)
        .try_init();
}

fn run_supervisor(command: Commands) -> i32 {
    let Commands::Run {
        config,
        log_file: _log_file,
        state_file,
        poll_sec,
        write_state_sec,
        run_seconds,
        no_restart,
        halt_on_job_failure,
        halt_when_all_stopped,
    } = command
    else {
        unreachable!("run_supervisor called with non-Run command");
    };

    let config_path = resolve_config_path(config.as_deref());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return EXIT_BAD_CONFIG;
        }
    };

    let poll_sec = resolve_seconds_env(poll_sec, "BOTSUP_POLL_SEC").unwrap_or(DEFAULT_POLL_SEC);
    if poll_sec <= 0.0 {
        error!("poll_sec must be greater than zero");
        return EXIT_BAD_CONFIG;
    }
    let write_state_sec =
        resolve_seconds_env(write_state_sec, "BOTSUP_WRITE_STATE_SEC").unwrap_or(DEFAULT_WRITE_STATE_SEC);
    if write_state_sec <= 0.0 {
        error!("write_state_sec must be greater than zero");
        return EXIT_BAD_CONFIG;
    }
    let run_seconds = run_seconds.or_else(|| {
        std::env::var("BOTSUP_RUN_SECONDS").ok().and_then(|v| v.parse().ok())
    });

    let state_file = PathBuf::from(state_file);
    let lock_file = state_file.with_extension("lock");

    let options = SupervisorOptions {
        config_path,
        state_file,
        lock_file,
        poll_interval: Duration::from_secs_f64(poll_sec),
        write_state_interval: Duration::from_secs_f64(write_state_sec),
        run_seconds,
        no_restart,
        halt_on_job_failure,
        halt_when_all_stopped,
    };

    match Supervisor::start(options, config) {
        Ok(supervisor) => supervisor.run(),
        Err(err) => {
            if is_lock_busy(&err) {
                error!(error = %err, "another supervisor instance holds the lock");
                EXIT_LOCK_BUSY
            } else {
                error!(error = %err, "supervisor failed to start");
                EXIT_INTERNAL_ERROR
            }
        }
    }
}

fn is_lock_busy(err: &botsup::error::SupervisorError) -> bool {
    matches!(err, botsup::error::SupervisorError::Lock(LockError::Busy { .. }))
}

fn run_status(command: Commands) -> i32 {
    let Commands::Status { state_file, json } = command else {
        unreachable!("run_status called with non-Status command");
    };
    let state_file = PathBuf::from(state_file);

    match supervisor::load_snapshot(&state_file) {
        Ok(Some(snapshot)) => {
            print!("{}", render_table(&snapshot));
            if json {
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(body) => println!("{body}"),
                    Err(err) => warn!(error = %err, "failed to serialize snapshot as JSON"),
                }
            }
            EXIT_CLEAN
        }
        Ok(None) => {
            eprintln!("no snapshot found at {}", state_file.display());
            EXIT_BAD_CONFIG
        }
        Err(err) => {
            error!(error = %err, "failed to read snapshot");
            EXIT_INTERNAL_ERROR
        }
    }
}

fn run_stop(command: Commands) -> i32 {
    let Commands::Stop { state_file } = command else {
        unreachable!("run_stop called with non-Stop command");
    };
    let state_file = PathBuf::from(state_file);

    match supervisor::request_external_stop(&state_file) {
        Ok(StopOutcome::Acknowledged) => EXIT_CLEAN,
        Ok(StopOutcome::SnapshotAbsent) => {
            eprintln!("no snapshot found at {}", state_file.display());
            EXIT_BAD_CONFIG
        }
        Ok(StopOutcome::SupervisorNotLive) => {
            eprintln!("supervisor recorded in snapshot is not live");
            botsup::constants::EXIT_LOCK_BUSY
        }
        Err(err) => {
            error!(error = %err, "failed to request stop");
            EXIT_INTERNAL_ERROR
        }
    }
}

fn run_daemon(command: Commands) -> i32 {
    let Commands::Daemon {
        config,
        job,
        state_file,
        at,
        run_on_start,
        retry_delay_sec,
        max_consecutive_failures,
        poll_sec,
        skip_refresh,
    } = command
    else {
        unreachable!("run_daemon called with non-Daemon command");
    };

    let config_path = resolve_config_path(config.as_deref());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return EXIT_BAD_CONFIG;
        }
    };

    let Some(job_spec) = config.jobs.get(&job).cloned() else {
        error!(job = %job, "job not found in config");
        return EXIT_BAD_CONFIG;
    };

    let (fire_hour, fire_minute) = match parse_hh_mm(&at) {
        Some(parts) => parts,
        None => {
            error!(at = %at, "--at must be formatted HH:MM");
            return EXIT_BAD_CONFIG;
        }
    };

    let state_file = PathBuf::from(state_file);
    let lock_file = state_file.with_extension("lock");

    let wake_granularity = resolve_seconds_env(poll_sec, "BOTSUP_DAEMON_POLL_SEC")
        .map(Duration::from_secs_f64)
        .unwrap_or(DAEMON_WAKE_GRANULARITY);

    let options = DaemonOptions {
        config_path,
        state_file,
        lock_file,
        fire_hour,
        fire_minute,
        run_on_start,
        retry_delay: Duration::from_secs(retry_delay_sec),
        max_consecutive_failures,
        max_run_seconds: job_spec.max_run_seconds,
        wake_granularity,
        skip_refresh,
    };

    match daemon::run(options, job_spec) {
        Ok(code) => code,
        Err(err) => {
            if matches!(err, botsup::error::DaemonError::Lock(LockError::Busy { .. })) {
                error!(error = %err, "another daemon instance holds the lock");
                EXIT_LOCK_BUSY
            } else {
                error!(error = %err, "daemon failed to start");
                EXIT_INTERNAL_ERROR
            }
        }
    }
}

fn parse_hh_mm(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}
