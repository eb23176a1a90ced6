use crate::config::types::{Result, SandboxError, SandboxStatus};
use crate::exec::plan::LaunchPlan;
use crate::kernel::signal::{raise_with_default_action, SETUP_FAILURE_SIGNAL};
use crate::observability::run_log::RunLog;
/// Pre-exec ordering enforcement for the sandboxed child
///
/// The setup sequence is fixed:
/// 1. chdir into the working directory
/// 2. apply rlimits (before the filter, so setrlimit is never blocked)
/// 3. redirect stdin, stdout, stderr (before the filter, so open/dup are never blocked)
/// 4. load the syscall filter, as the last step before exec
/// 5. execve the subject
///
/// Every failure funnels into [`run_child`], which reports it exactly once.
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use std::convert::Infallible;
use std::ffi::CStr;
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

// ============================================================================
// Type-State Markers
// ============================================================================

/// Freshly forked child, nothing applied yet
pub struct FreshChild;

/// Working directory entered
pub struct WorkdirEntered;

/// Resource limits applied
pub struct LimitsApplied;

/// Standard streams redirected
pub struct StreamsRedirected;

/// Syscall filter loaded; only execve remains
pub struct ExecReady;

/// Child-side launcher whose type parameter records the completed step
pub struct ChildLauncher<'p, S> {
    plan: &'p LaunchPlan,
    _state: PhantomData<S>,
}

impl<'p, S> ChildLauncher<'p, S> {
    fn advance<T>(self) -> ChildLauncher<'p, T> {
        ChildLauncher {
            plan: self.plan,
            _state: PhantomData,
        }
    }
}

impl<'p> ChildLauncher<'p, FreshChild> {
    pub fn new(plan: &'p LaunchPlan) -> Self {
        Self {
            plan,
            _state: PhantomData,
        }
    }

    pub fn enter_workdir(self) -> Result<ChildLauncher<'p, WorkdirEntered>> {
        if let Some(dir) = &self.plan.working_directory {
            unistd::chdir(dir.as_c_str()).map_err(|errno| {
                SandboxError::InvalidWorkingDirectory(format!(
                    "{}: {}",
                    dir.to_string_lossy(),
                    errno
                ))
            })?;
        }
        Ok(self.advance())
    }
}

impl<'p> ChildLauncher<'p, WorkdirEntered> {
    pub fn apply_limits(self) -> Result<ChildLauncher<'p, LimitsApplied>> {
        self.plan.rlimits.apply()?;
        Ok(self.advance())
    }
}

impl<'p> ChildLauncher<'p, LimitsApplied> {
    pub fn redirect_streams(self) -> Result<ChildLauncher<'p, StreamsRedirected>> {
        let plan = self.plan;

        if let Some(path) = &plan.input_file {
            let fd = open_stream(path, OFlag::O_RDONLY).map_err(|errno| {
                SandboxError::InputFileOpen(format!("{}: {}", path.to_string_lossy(), errno))
            })?;
            redirect(fd, libc::STDIN_FILENO)?;
        }

        let write_flags = OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC;

        if let Some(path) = &plan.output_file {
            let fd = open_stream(path, write_flags).map_err(|errno| {
                SandboxError::OutputFileOpen(format!("{}: {}", path.to_string_lossy(), errno))
            })?;
            redirect(fd, libc::STDOUT_FILENO)?;
        }

        if plan.shares_error_stream() {
            unistd::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO).map_err(|errno| {
                SandboxError::FileRedirect(format!("stdout onto stderr: {}", errno))
            })?;
        } else if let Some(path) = &plan.error_file {
            let fd = open_stream(path, write_flags).map_err(|errno| {
                SandboxError::ErrorFileOpen(format!("{}: {}", path.to_string_lossy(), errno))
            })?;
            redirect(fd, libc::STDERR_FILENO)?;
        }

        Ok(self.advance())
    }
}

impl<'p> ChildLauncher<'p, StreamsRedirected> {
    pub fn load_policy(self) -> Result<ChildLauncher<'p, ExecReady>> {
        self.plan.filter.load()?;
        Ok(self.advance())
    }
}

impl<'p> ChildLauncher<'p, ExecReady> {
    /// Replace the process image. Only returns on failure.
    pub fn exec_payload(self) -> SandboxError {
        let plan = self.plan;
        // SAFETY: program, argv and envp are NUL-terminated C strings and
        // NULL-terminated pointer arrays owned by the plan.
        unsafe {
            libc::execve(plan.program().as_ptr(), plan.argv_ptr(), plan.envp_ptr());
        }
        SandboxError::Exec(format!(
            "{}: {}",
            plan.program().to_string_lossy(),
            Errno::last()
        ))
    }
}

// ============================================================================
// Child Entry Point
// ============================================================================

/// Body of the forked child. Either becomes the subject or dies reporting
/// the setup failure through [`SETUP_FAILURE_SIGNAL`].
pub fn run_child(plan: &LaunchPlan, log: &RunLog) -> ! {
    let failure = match launch(plan) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    report_setup_failure(log, &failure)
}

fn launch(plan: &LaunchPlan) -> Result<Infallible> {
    let ready = ChildLauncher::new(plan)
        .enter_workdir()?
        .apply_limits()?
        .redirect_streams()?
        .load_policy()?;
    Err(ready.exec_payload())
}

fn report_setup_failure(log: &RunLog, err: &SandboxError) -> ! {
    log.error_after_fork(&format!("(CHILD {}) {}", std::process::id(), err));
    raise_with_default_action(SETUP_FAILURE_SIGNAL);
    // SAFETY: terminates the child without running parent-owned destructors.
    unsafe { libc::_exit(SandboxStatus::InternalError.code()) }
}

// ============================================================================
// Stream Helpers
// ============================================================================

/// Open close-on-exec so only the dup'ed standard descriptor survives exec
fn open_stream(path: &CStr, flags: OFlag) -> nix::Result<OwnedFd> {
    let fd = fcntl::open(path, flags | OFlag::O_CLOEXEC, Mode::from_bits_truncate(0o666))?;
    // SAFETY: fd was just returned by open and has no other owner.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Move `fd` onto `target`. The source descriptor is closed afterwards,
/// including when the dup fails.
fn redirect(fd: OwnedFd, target: RawFd) -> Result<()> {
    if fd.as_raw_fd() == target {
        fcntl::fcntl(target, FcntlArg::F_SETFD(FdFlag::empty()))
            .map_err(|errno| SandboxError::FileRedirect(format!("fd {}: {}", target, errno)))?;
        let _ = fd.into_raw_fd();
        return Ok(());
    }
    unistd::dup2(fd.as_raw_fd(), target)
        .map_err(|errno| SandboxError::FileRedirect(format!("fd {}: {}", target, errno)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek};

    #[test]
    fn open_stream_creates_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"stale contents").unwrap();

        let c_path = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
        let fd = open_stream(&c_path, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC).unwrap();
        let flags = fcntl::fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
        assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
        drop(fd);

        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn open_stream_reports_missing_input() {
        let err = open_stream(c"/nonexistent/runbox/input", OFlag::O_RDONLY).unwrap_err();
        assert_eq!(err, Errno::ENOENT);
    }

    #[test]
    fn redirect_moves_descriptor() {
        let mut target = tempfile::tempfile().unwrap();
        let source = tempfile::tempfile().unwrap();
        let target_fd = target.as_raw_fd();

        use std::io::Write;
        let mut writer = std::fs::File::from(OwnedFd::from(source));
        writer.write_all(b"moved").unwrap();
        redirect(OwnedFd::from(writer), target_fd).unwrap();

        // target now refers to the source file description (offset 5)
        target.rewind().unwrap();
        let mut contents = String::new();
        target.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "moved");
    }
}
