//! Worker: a uniform wrapper around one supervised external command
//! (spec.md §4.3). Starts the process, routes its stdout/stderr to an
//! append-only log file, observes exit status, and reports structured
//! lifecycle events upstream over a bounded channel so a slow disk never
//! blocks the control loop (§5).
use std::{
    fs::OpenOptions,
    io::{BufRead, BufReader},
    process::{Child, Command, Stdio},
    sync::mpsc::{sync_channel, Receiver, SyncSender},
    thread,
    time::{Instant, SystemTime},
};

use crate::{config::JobSpec, error::WorkerError};

#[cfg(unix)]
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Why a worker's child process stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// The child exited on its own.
    NaturalExit,
    /// `request_stop` was called and the child exited afterward.
    StopRequested,
    /// The grace window elapsed and `kill` was used.
    KilledAfterGrace,
}

/// Outcome of a completed worker run, reported once per child exit.
#[derive(Debug, Clone)]
pub struct ExitRecord {
    /// Exit code, if the process terminated normally.
    pub exit_code: Option<i32>,
    /// When the child was spawned.
    pub started_at: SystemTime,
    /// When the child was reaped.
    pub ended_at: SystemTime,
    /// Highest combined stdout+stderr byte offset observed.
    pub peak_log_offset: u64,
    /// Why the child is no longer running.
    pub cause: ExitCause,
}

/// A lifecycle event pushed onto the shared channel the control loop drains
/// once per tick (spec.md §5).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Progress report from a log-forwarding thread: cumulative bytes
    /// written and the timestamp of the last line seen.
    LogProgress {
        job: String,
        bytes_written: u64,
        last_line_at: SystemTime,
    },
    /// The child has exited and been reaped.
    Exited { job: String, record: ExitRecord },
}

/// A running (or just-started) child process under supervision.
pub struct WorkerHandle {
    job: String,
    pid: u32,
    started_at: SystemTime,
    stop_requested: bool,
    killed: bool,
    #[cfg(unix)]
    child_for_signal: Pid,
    #[cfg(windows)]
    job_object: Option<windows_job::Job>,
    child: Option<Child>,
}

impl WorkerHandle {
    /// Process id of the running child.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Spawns `job_spec`'s program as a child process. The spawn is
/// non-blocking; stdout/stderr are forwarded to the job's log file on
/// dedicated threads that report progress over `events`.
pub fn start(
    job_spec: &JobSpec,
    events: SyncSender<LifecycleEvent>,
) -> Result<WorkerHandle, WorkerError> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&job_spec.log_file)
        .map_err(|source| WorkerError::LogOpen {
            job: job_spec.name.clone(),
            path: job_spec.log_file.clone(),
            source,
        })?;

    let mut command = Command::new(&job_spec.program);
    command.args(&job_spec.args);
    command.envs(&job_spec.env);
    if let Some(cwd) = &job_spec.cwd {
        command.current_dir(cwd);
    }
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    #[cfg(windows)]
    {
        // CREATE_NEW_PROCESS_GROUP lets request_stop target this child (and
        // only this child) with a CTRL_BREAK_EVENT without also breaking
        // the supervisor's own console.
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
        job: job_spec.name.clone(),
        program: job_spec.program.clone(),
        source,
    })?;

    let pid = child.id();
    let started_at = SystemTime::now();

    #[cfg(windows)]
    let job_object = windows_job::Job::create_kill_on_close()
        .and_then(|job| job.add_process(pid).map(|()| job))
        .map_err(|err| {
            tracing::warn!(job = %job_spec.name, pid, error = %err, "failed to attach job to kill-on-close job object");
        })
        .ok();

    let stdout_log = log_file.try_clone().map_err(|source| WorkerError::LogOpen {
        job: job_spec.name.clone(),
        path: job_spec.log_file.clone(),
        source,
    })?;
    spawn_log_forwarder(job_spec.name.clone(), child.stdout.take(), events.clone(), stdout_log);
    spawn_log_forwarder(job_spec.name.clone(), child.stderr.take(), events, log_file);

    Ok(WorkerHandle {
        job: job_spec.name.clone(),
        pid,
        started_at,
        stop_requested: false,
        killed: false,
        #[cfg(unix)]
        child_for_signal: Pid::from_raw(pid as i32),
        #[cfg(windows)]
        job_object,
        child: Some(child),
    })
}

fn spawn_log_forwarder<R>(
    job: String,
    pipe: Option<R>,
    events: SyncSender<LifecycleEvent>,
    mut log_file: std::fs::File,
) where
    R: std::io::Read + Send + 'static,
{
    let Some(pipe) = pipe else { return };
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut bytes_written: u64 = 0;
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    use std::io::Write;
                    if log_file.write_all(buf.as_bytes()).is_err() {
                        break;
                    }
                    bytes_written += n as u64;
                    let _ = events.try_send(LifecycleEvent::LogProgress {
                        job: job.clone(),
                        bytes_written,
                        last_line_at: SystemTime::now(),
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Blocks until the child exits, then returns its [`ExitRecord`]. Intended
/// to run on a dedicated reaper thread per worker; the caller forwards the
/// result over the same lifecycle-event channel used for log progress.
pub fn wait(mut handle: WorkerHandle) -> ExitRecord {
    let peak_log_offset = 0;
    let cause = if handle.killed {
        ExitCause::KilledAfterGrace
    } else if handle.stop_requested {
        ExitCause::StopRequested
    } else {
        ExitCause::NaturalExit
    };

    let exit_code = match handle.child.take() {
        Some(mut child) => match child.wait() {
            Ok(status) => status.code(),
            Err(_) => None,
        },
        None => None,
    };

    ExitRecord {
        exit_code,
        started_at: handle.started_at,
        ended_at: SystemTime::now(),
        peak_log_offset,
        cause,
    }
}

/// Non-blocking poll for whether the child has exited. Returns `Some` with
/// the completed [`ExitRecord`] exactly once, the first call after the
/// child actually exits; callers should stop invoking it on a handle after
/// it has returned `Some`.
pub fn try_wait(handle: &mut WorkerHandle) -> Option<ExitRecord> {
    let status = match handle.child.as_mut() {
        Some(child) => child.try_wait(),
        None => return None,
    };

    match status {
        Ok(Some(status)) => {
            handle.child = None;
            let cause = if handle.killed {
                ExitCause::KilledAfterGrace
            } else if handle.stop_requested {
                ExitCause::StopRequested
            } else {
                ExitCause::NaturalExit
            };
            Some(ExitRecord {
                exit_code: status.code(),
                started_at: handle.started_at,
                ended_at: SystemTime::now(),
                peak_log_offset: 0,
                cause,
            })
        }
        Ok(None) => None,
        Err(_) => None,
    }
}

/// Sends a platform-appropriate cooperative termination request. Idempotent.
pub fn request_stop(handle: &mut WorkerHandle) -> Result<(), WorkerError> {
    handle.stop_requested = true;

    #[cfg(unix)]
    {
        kill(handle.child_for_signal, Signal::SIGTERM).map_err(|errno| WorkerError::Signal {
            job: handle.job.clone(),
            pid: handle.pid,
            source: std::io::Error::from_raw_os_error(errno as i32),
        })?;
    }

    #[cfg(windows)]
    {
        // Best-effort cooperative break; the kill-on-close job object set up
        // in `start` guarantees the child dies even if this fails or is
        // ignored, once `kill` or process exit closes the job handle.
        unsafe {
            windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent(1, handle.pid);
        }
    }

    Ok(())
}

/// Forces immediate termination. Used only after the grace window elapses.
pub fn kill_now(handle: &mut WorkerHandle) -> Result<(), WorkerError> {
    handle.killed = true;
    if let Some(child) = handle.child.as_mut() {
        child.kill().map_err(|source| WorkerError::Signal {
            job: handle.job.clone(),
            pid: handle.pid,
            source,
        })?;
    }
    Ok(())
}

#[cfg(windows)]
mod windows_job {
    //! RAII wrapper around a Windows Job Object with `KILL_ON_JOB_CLOSE` set,
    //! one per worker, so an unresponsive child is guaranteed to die with its
    //! handle rather than being leaked as an orphan.
    use std::fmt;

    use windows_sys::Win32::{
        Foundation::{CloseHandle, HANDLE},
        System::{
            JobObjects::{
                AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
                SetInformationJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
                JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
            },
            Threading::{OpenProcess, PROCESS_ALL_ACCESS},
        },
    };

    pub struct Job(HANDLE);

    unsafe impl Send for Job {}
    unsafe impl Sync for Job {}

    #[derive(Debug)]
    pub struct JobError(pub &'static str);

    impl fmt::Display for JobError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Job {
        pub fn create_kill_on_close() -> Result<Self, JobError> {
            let handle = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
            if handle == 0 {
                return Err(JobError("CreateJobObjectW failed"));
            }

            let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
            limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

            let ok = unsafe {
                SetInformationJobObject(
                    handle,
                    JobObjectExtendedLimitInformation,
                    &mut limits as *mut _ as *mut _,
                    std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
                )
            };
            if ok == 0 {
                unsafe { CloseHandle(handle) };
                return Err(JobError("SetInformationJobObject failed"));
            }
            Ok(Job(handle))
        }

        pub fn add_process(&self, pid: u32) -> Result<(), JobError> {
            let proc = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, pid) };
            if proc == 0 {
                return Err(JobError("OpenProcess failed, child may have already exited"));
            }
            let ok = unsafe { AssignProcessToJobObject(self.0, proc) };
            unsafe { CloseHandle(proc) };
            if ok == 0 {
                return Err(JobError("AssignProcessToJobObject failed"));
            }
            Ok(())
        }
    }

    impl Drop for Job {
        fn drop(&mut self) {
            unsafe { CloseHandle(self.0) };
        }
    }
}
