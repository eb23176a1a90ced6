//! Parent-side orchestration of one sandbox run
//!
//! Validating -> Forking -> {child running, monitoring} -> Reaping -> Classifying

use crate::config::policy::{self, SandboxPolicy};
use crate::config::types::{Result, SandboxError, SandboxOutcome, SandboxRequest};
use crate::config::validator::validate_request;
use crate::exec::monitor::TimeoutMonitor;
use crate::exec::plan::LaunchPlan;
use crate::exec::preexec;
use crate::observability::run_log::RunLog;
use crate::verdict::verdict::{LimitSnapshot, RunEvidence, VerdictClassifier};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::time::Instant;

fn to_wait_error(prefix: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Wait(format!("{prefix}: {err}"))
}

/// Runs one validated request at a time; holds no state between runs
pub struct SandboxExecutor {
    request: SandboxRequest,
    policy: &'static SandboxPolicy,
    log: RunLog,
}

impl SandboxExecutor {
    /// Validate `request` and bind it to its policy
    pub fn new(request: SandboxRequest) -> Result<Self> {
        let log = RunLog::new(&request.task_name, request.log_file.as_deref());

        let warnings = validate_request(Some(&request)).into_result().inspect_err(|e| {
            log.error(e.to_string());
        })?;
        for warning in warnings {
            log.warn(format!("Configuration warning: {}", warning));
        }

        let policy = policy::resolve(request.policy).ok_or_else(|| {
            SandboxError::InvalidConfiguration(format!("Unknown policy id {}", request.policy))
        })?;

        Ok(Self {
            request,
            policy,
            log,
        })
    }

    pub fn request(&self) -> &SandboxRequest {
        &self.request
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Run the subject to completion and classify the result
    pub fn execute(&self) -> Result<SandboxOutcome> {
        self.run_once().inspect_err(|e| self.log.error(e.to_string()))
    }

    fn run_once(&self) -> Result<SandboxOutcome> {
        let plan = LaunchPlan::prepare(&self.request, self.policy)?;

        self.log.info(format!(
            "Starting sandboxed process: \"{}\" (policy: {})",
            self.request.command, self.policy.name
        ));
        if plan.filter.is_active() {
            self.log.info(format!(
                "Loading policy '{}' in the child ({} instructions)",
                self.policy.name,
                plan.filter.instruction_count()
            ));
        }

        let started = Instant::now();
        // SAFETY: the child branch only runs `run_child`, which ends in
        // execve or _exit and never returns into this function.
        let child = match unsafe { fork() } {
            Ok(ForkResult::Child) => preexec::run_child(&plan, &self.log),
            Ok(ForkResult::Parent { child }) => child,
            Err(errno) => return Err(SandboxError::Fork(errno.to_string())),
        };
        drop(plan);

        self.log
            .debug(format!("Forked sandboxed process {}", child));
        self.supervise(child, started)
    }

    fn supervise(&self, child: Pid, started: Instant) -> Result<SandboxOutcome> {
        let monitor = if self.request.max_real_time_ms != 0 {
            match TimeoutMonitor::start(child, self.request.max_real_time_ms, self.log.clone()) {
                Ok(monitor) => Some(monitor),
                Err(e) => {
                    kill_and_reap(child);
                    return Err(e);
                }
            }
        } else {
            None
        };

        // Wait without reaping so the pid stays ours until the monitor is gone.
        let terminated = wait_for_termination(child);
        let wall_time_ms = started.elapsed().as_millis() as u64;
        let killed_by_monitor = monitor.map(TimeoutMonitor::cancel).unwrap_or(false);

        if let Err(e) = terminated {
            kill_and_reap(child);
            return Err(e);
        }

        let (status, usage) = match reap_with_usage(child) {
            Ok(reaped) => reaped,
            Err(e) => {
                kill_and_reap(child);
                return Err(e);
            }
        };

        let (exit_code, signal) = match status {
            WaitStatus::Exited(_, code) => (code, 0),
            WaitStatus::Signaled(_, sig, _) => (0, sig as i32),
            _ => (0, 0),
        };

        let evidence = RunEvidence {
            exit_code,
            signal,
            wall_time_ms,
            cpu_time_ms: timeval_ms(&usage.ru_utime),
            memory_bytes: (usage.ru_maxrss.max(0) as u64).saturating_mul(1024),
        };
        let outcome = VerdictClassifier::outcome(&evidence, &LimitSnapshot::from_request(&self.request));

        if killed_by_monitor {
            self.log
                .info(format!("Process {} was killed by the timeout monitor", child));
        }
        self.log.info(format!(
            "Sandboxed process finished: status={} exit_code={} signal={} cpu={}ms real={}ms memory={}B",
            outcome.status,
            outcome.exit_code,
            outcome.signal,
            outcome.cpu_time_ms,
            outcome.real_time_ms,
            outcome.memory_bytes
        ));

        Ok(outcome)
    }
}

/// Block until `child` has terminated, leaving it unreaped
fn wait_for_termination(child: Pid) -> Result<()> {
    loop {
        match waitid(Id::Pid(child), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_wait_error("waitid", e)),
        }
    }
}

/// Reap `child`, collecting its wait status and resource usage together
fn reap_with_usage(child: Pid) -> Result<(WaitStatus, libc::rusage)> {
    let mut raw_status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; all-zero is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        // SAFETY: both out-pointers reference live stack locals.
        let rc = unsafe { libc::wait4(child.as_raw(), &mut raw_status, 0, &mut usage) };
        if rc == child.as_raw() {
            break;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            errno => return Err(to_wait_error("wait4", errno)),
        }
    }

    let status =
        WaitStatus::from_raw(child, raw_status).map_err(|e| to_wait_error("wait status", e))?;
    Ok((status, usage))
}

/// Last resort after a parent-side failure: never leave the child behind
fn kill_and_reap(child: Pid) {
    let _ = kill(child, Signal::SIGKILL);
    loop {
        match waitpid(child, None) {
            Err(Errno::EINTR) => continue,
            _ => break,
        }
    }
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    let ms = tv.tv_sec as i64 * 1000 + tv.tv_usec as i64 / 1000;
    ms.max(0) as u64
}
