//! Configuration loading for botsup (spec.md §6).
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_COOLDOWN_BASE_SEC, DEFAULT_COOLDOWN_CAP_SEC, DEFAULT_LOG_DIR},
    error::ConfigError,
};

/// Restart policy declared per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Always restart, regardless of exit code.
    Always,
    /// Restart only on non-zero exit, subject to `max_consecutive_failures`.
    OnFailure,
    /// Never restart; exit is terminal.
    Never,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::OnFailure
    }
}

/// Raw on-disk shape of a single job entry, before argv resolution.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJobSpec {
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    command: Option<Vec<String>>,
    program: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    log_file: Option<String>,
    #[serde(default)]
    restart: RestartPolicy,
    #[serde(default)]
    max_consecutive_failures: u32,
    cooldown_base_sec: Option<u64>,
    cooldown_cap_sec: Option<u64>,
    max_run_seconds: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// A fully resolved, immutable job specification (spec.md §3).
#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    /// Stable name, unique among all jobs for this supervisor.
    pub name: String,
    /// Whether the job should be started at all.
    pub enabled: bool,
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program (argv[1..]).
    pub args: Vec<String>,
    /// Working directory, if not the current one.
    pub cwd: Option<PathBuf>,
    /// Environment overlay merged onto the ambient environment.
    pub env: BTreeMap<String, String>,
    /// Log file path; defaults to `logs/<name>.log` relative to the config file.
    pub log_file: PathBuf,
    /// Restart policy.
    pub restart: RestartPolicy,
    /// Maximum consecutive failures before `disabled-by-policy` (0 = unbounded).
    pub max_consecutive_failures: u32,
    /// Backoff base in seconds.
    pub cooldown_base_sec: u64,
    /// Backoff cap in seconds.
    pub cooldown_cap_sec: u64,
    /// Optional per-job wall-clock cap.
    pub max_run_seconds: Option<u64>,
}

/// Top-level config document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    jobs: Vec<RawJobSpec>,
}

/// Validated, resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Jobs keyed by name.
    pub jobs: BTreeMap<String, JobSpec>,
}

impl RawJobSpec {
    fn resolve_argv(&self) -> Result<(String, Vec<String>), ConfigError> {
        match (&self.command, &self.program) {
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousCommand(self.name.clone())),
            (None, None) => Err(ConfigError::AmbiguousCommand(self.name.clone())),
            (Some(command), None) => {
                let mut iter = command.iter().cloned();
                let program = iter
                    .next()
                    .ok_or_else(|| ConfigError::EmptyArgv(self.name.clone()))?;
                Ok((program, iter.collect()))
            }
            (None, Some(program)) => {
                if program.trim().is_empty() {
                    return Err(ConfigError::EmptyArgv(self.name.clone()));
                }
                Ok((program.clone(), self.args.clone()))
            }
        }
    }

    fn into_job_spec(self, base_dir: &Path) -> Result<JobSpec, ConfigError> {
        let (program, args) = self.resolve_argv()?;

        let log_file = match self.log_file {
            Some(path) => resolve_relative(base_dir, &path),
            None => base_dir.join(DEFAULT_LOG_DIR).join(format!("{}.log", self.name)),
        };

        let cwd = self.cwd.map(|path| resolve_relative(base_dir, &path));

        Ok(JobSpec {
            name: self.name,
            enabled: self.enabled,
            program,
            args,
            cwd,
            env: self.env,
            log_file,
            restart: self.restart,
            max_consecutive_failures: self.max_consecutive_failures,
            cooldown_base_sec: self.cooldown_base_sec.unwrap_or(DEFAULT_COOLDOWN_BASE_SEC),
            cooldown_cap_sec: self.cooldown_cap_sec.unwrap_or(DEFAULT_COOLDOWN_CAP_SEC),
            max_run_seconds: self.max_run_seconds,
        })
    }
}

fn resolve_relative(base_dir: &Path, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(candidate)
    }
}

/// Loads and validates the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let raw: RawConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut jobs = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for raw_job in raw.jobs {
        if !seen.insert(raw_job.name.clone()) {
            return Err(ConfigError::DuplicateName(raw_job.name));
        }
        let job = raw_job.into_job_spec(base_dir)?;
        jobs.insert(job.name.clone(), job);
    }

    Ok(Config { jobs })
}
