//! Command-line interface for botsup (spec.md §6).
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for botsup.
#[derive(Parser)]
#[command(name = "botsup", version, author)]
#[command(about = "Process supervisor and daily-fire daemon for long-lived jobs", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for botsup.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the supervisor against a config file (spec.md §4.4).
    Run {
        /// Path to the JSON config file.
        #[arg(long, value_name = "PATH")]
        config: Option<String>,

        /// Path to the supervisor's own lifecycle log file.
        #[arg(long = "log-file", value_name = "PATH")]
        log_file: Option<String>,

        /// Path to the JSON state snapshot.
        #[arg(long = "state-file", value_name = "PATH", default_value = "botsup.state.json")]
        state_file: String,

        /// Main-loop cadence, in seconds.
        #[arg(long = "poll-sec", value_name = "SECONDS")]
        poll_sec: Option<f64>,

        /// Snapshot-persistence cadence, in seconds.
        #[arg(long = "write-state-sec", value_name = "SECONDS")]
        write_state_sec: Option<f64>,

        /// Overall run-time budget, in seconds.
        #[arg(long = "run-seconds", value_name = "SECONDS")]
        run_seconds: Option<u64>,

        /// Never restart any job, regardless of its own restart policy.
        #[arg(long = "no-restart")]
        no_restart: bool,

        /// Halt the whole supervisor once a job exceeds its failure ceiling.
        #[arg(long = "halt-on-job-failure")]
        halt_on_job_failure: bool,

        /// Halt the whole supervisor once every enabled job is terminal.
        #[arg(long = "halt-when-all-stopped")]
        halt_when_all_stopped: bool,
    },

    /// Print the current snapshot without touching the supervisor process.
    Status {
        /// Path to the JSON state snapshot.
        #[arg(long = "state-file", value_name = "PATH", default_value = "botsup.state.json")]
        state_file: String,

        /// Also emit the snapshot as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Request a running supervisor to stop, via the snapshot file only.
    Stop {
        /// Path to the JSON state snapshot.
        #[arg(long = "state-file", value_name = "PATH", default_value = "botsup.state.json")]
        state_file: String,
    },

    /// Run the "daily at HH:MM" Daemon Driver for a single job (spec.md §4.5).
    Daemon {
        /// Path to the JSON config file; the daemon drives its one job entry.
        #[arg(long, value_name = "PATH")]
        config: Option<String>,

        /// Name of the job within the config file to drive.
        #[arg(long = "job")]
        job: String,

        /// Path to the JSON state snapshot.
        #[arg(long = "state-file", value_name = "PATH", default_value = "botsup.daemon.json")]
        state_file: String,

        /// Local wall-clock time to fire at, formatted `HH:MM`.
        #[arg(long = "at", value_name = "HH:MM")]
        at: String,

        /// Fire immediately on startup, in addition to the daily schedule.
        #[arg(long = "run-on-start")]
        run_on_start: bool,

        /// Delay before retrying after a failed fire, in seconds.
        #[arg(long = "retry-delay-sec", default_value = "60")]
        retry_delay_sec: u64,

        /// Consecutive failures before the daemon pauses retries.
        #[arg(long = "max-consecutive-failures", default_value = "0")]
        max_consecutive_failures: u32,

        /// Wake/poll cadence used while waiting for the next fire, in seconds.
        #[arg(long = "poll-sec")]
        poll_sec: Option<f64>,

        /// Passed through to the fired job (as `BOTSUP_SKIP_REFRESH=1` in its
        /// environment) so it can skip its own refresh step for this fire.
        #[arg(long = "skip-refresh")]
        skip_refresh: bool,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
