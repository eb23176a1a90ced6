//! Pre-fork launch preparation
//!
//! Everything the child needs is materialized here, in the parent: C strings
//! for the program, argv, envp and redirection paths, the rlimit set, and the
//! compiled syscall filter. The child only reads this plan.

use crate::config::limits::ResolvedLimits;
use crate::config::policy::SandboxPolicy;
use crate::config::types::{Result, SandboxError, SandboxRequest, MAX_ARGUMENTS};
use crate::kernel::rlimit::RlimitSet;
use crate::kernel::seccomp::PolicyFilter;
use nix::unistd::{access, AccessFlags};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

pub struct LaunchPlan {
    program: CString,
    argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp: Vec<CString>,
    envp_ptrs: Vec<*const c_char>,
    pub working_directory: Option<CString>,
    pub input_file: Option<CString>,
    pub output_file: Option<CString>,
    pub error_file: Option<CString>,
    pub rlimits: RlimitSet,
    pub filter: PolicyFilter,
}

impl LaunchPlan {
    pub fn prepare(request: &SandboxRequest, policy: &'static SandboxPolicy) -> Result<Self> {
        let args = parse_command_line(&request.command)?;
        let program_path = resolve_program(&args[0], request.working_directory.as_deref())?;
        let program = path_cstring(&program_path)?;

        let argv = args
            .iter()
            .map(|arg| {
                CString::new(arg.as_str()).map_err(|_| {
                    SandboxError::InvalidCommand(format!("argument contains NUL byte: {:?}", arg))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let envp = build_environment(&request.environment)?;

        // The execve rule compares against this buffer's address.
        let filter = PolicyFilter::build(policy, &program)?;

        let resolved = ResolvedLimits::from_request(request);
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        Ok(Self {
            program,
            argv,
            argv_ptrs,
            envp,
            envp_ptrs,
            working_directory: optional_path(request.working_directory.as_deref())?,
            input_file: optional_path(request.input_file.as_deref())?,
            output_file: optional_path(request.output_file.as_deref())?,
            error_file: optional_path(request.error_file.as_deref())?,
            rlimits: RlimitSet::from_request(request, &resolved),
            filter,
        })
    }

    /// Absolute path handed to execve
    pub fn program(&self) -> &CStr {
        &self.program
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn envp(&self) -> &[CString] {
        &self.envp
    }

    /// NULL-terminated argv for execve
    pub fn argv_ptr(&self) -> *const *const c_char {
        self.argv_ptrs.as_ptr()
    }

    /// NULL-terminated envp for execve
    pub fn envp_ptr(&self) -> *const *const c_char {
        self.envp_ptrs.as_ptr()
    }

    /// Error stream goes to the exact same path as the output stream
    pub fn shares_error_stream(&self) -> bool {
        match (&self.output_file, &self.error_file) {
            (Some(output), Some(error)) => output.as_bytes() == error.as_bytes(),
            _ => false,
        }
    }
}

/// Split a command line on whitespace
pub fn parse_command_line(command: &str) -> Result<Vec<String>> {
    let args: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if args.is_empty() {
        return Err(SandboxError::InvalidCommand("command is empty".to_string()));
    }
    if args.len() >= MAX_ARGUMENTS {
        return Err(SandboxError::InvalidCommand(format!(
            "too many arguments: {} (max {})",
            args.len(),
            MAX_ARGUMENTS - 1
        )));
    }
    Ok(args)
}

/// Resolve the program token to a path: tokens with a slash are taken
/// relative to the working directory, bare names are searched on PATH.
pub fn resolve_program(token: &str, working_directory: Option<&Path>) -> Result<PathBuf> {
    if !token.contains('/') {
        return which::which(token)
            .map_err(|e| SandboxError::InvalidCommand(format!("{}: {}", token, e)));
    }

    let path = Path::new(token);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let base = match working_directory {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => std::env::current_dir()?.join(dir),
            None => std::env::current_dir()?,
        };
        base.join(path)
    };

    if !resolved.is_file() {
        return Err(SandboxError::InvalidCommand(format!(
            "program not found: {}",
            resolved.display()
        )));
    }
    // A failed execve under a filter cannot be reported as a setup failure.
    access(&resolved, AccessFlags::X_OK).map_err(|errno| {
        SandboxError::InvalidCommand(format!(
            "program not executable: {}: {}",
            resolved.display(),
            errno
        ))
    })?;
    Ok(resolved)
}

/// Caller-supplied entries, or a snapshot of our own environment when empty
fn build_environment(entries: &[String]) -> Result<Vec<CString>> {
    if entries.is_empty() {
        return Ok(std::env::vars_os()
            .filter_map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend(value.into_vec());
                CString::new(entry).ok()
            })
            .collect());
    }

    entries
        .iter()
        .map(|entry| {
            CString::new(entry.as_str()).map_err(|_| {
                SandboxError::InvalidConfiguration(format!(
                    "environment entry contains NUL byte: {:?}",
                    entry
                ))
            })
        })
        .collect()
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        SandboxError::InvalidConfiguration(format!("path contains NUL byte: {}", path.display()))
    })
}

fn optional_path(path: Option<&Path>) -> Result<Option<CString>> {
    path.map(path_cstring).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn request(command: &str) -> SandboxRequest {
        SandboxRequest {
            task_name: "plan".to_string(),
            command: command.to_string(),
            max_process_count: -1,
            ..SandboxRequest::default()
        }
    }

    #[test]
    fn splits_on_any_whitespace() {
        let args = parse_command_line("  /bin/echo a\tb \n c ").unwrap();
        assert_eq!(args, vec!["/bin/echo", "a", "b", "c"]);
    }

    #[test]
    fn rejects_empty_command() {
        assert!(matches!(
            parse_command_line(" \t "),
            Err(SandboxError::InvalidCommand(_))
        ));
    }

    #[test]
    fn enforces_argument_ceiling() {
        let at_limit = vec!["x"; MAX_ARGUMENTS - 1].join(" ");
        assert_eq!(parse_command_line(&at_limit).unwrap().len(), MAX_ARGUMENTS - 1);

        let over = vec!["x"; MAX_ARGUMENTS].join(" ");
        assert!(parse_command_line(&over).is_err());
    }

    #[test]
    fn bare_names_are_searched_on_path() {
        let resolved = resolve_program("sh", None).unwrap();
        assert!(resolved.ends_with("sh"));
        assert!(resolve_program("definitely-not-a-real-program-xyz", None).is_err());
    }

    #[test]
    fn relative_paths_use_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        let tool = dir.path().join("bin").join("tool");
        fs::write(&tool, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let resolved = resolve_program("./bin/tool", Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path().join("./bin/tool"));
        assert!(resolve_program("./bin/missing", Some(dir.path())).is_err());
    }

    #[test]
    fn rejects_file_without_execute_permission() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.bin");
        fs::write(&data, b"not a program").unwrap();
        fs::set_permissions(&data, fs::Permissions::from_mode(0o644)).unwrap();

        let err = resolve_program(data.to_str().unwrap(), None).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidCommand(ref msg) if msg.contains("not executable")));

        let req = request(data.to_str().unwrap());
        assert!(LaunchPlan::prepare(&req, policy::resolve(1).unwrap()).is_err());
    }

    #[test]
    fn plan_has_null_terminated_vectors() {
        let policy = policy::resolve(0).unwrap();
        let mut req = request("/bin/echo hello world");
        req.environment = vec!["A=1".to_string(), "B=2".to_string()];
        let plan = LaunchPlan::prepare(&req, policy).unwrap();

        assert_eq!(plan.program(), c"/bin/echo");
        assert_eq!(plan.argv().len(), 3);
        assert_eq!(plan.envp().len(), 2);
        // SAFETY: both arrays hold len + 1 pointers.
        unsafe {
            assert!((*plan.argv_ptr().add(3)).is_null());
            assert!((*plan.envp_ptr().add(2)).is_null());
            assert_eq!(CStr::from_ptr(*plan.argv_ptr().add(1)), c"hello");
        }
        assert!(!plan.filter.is_active());
    }

    #[test]
    fn empty_environment_inherits() {
        std::env::set_var("RUNBOX_PLAN_TEST", "inherited");
        let plan = LaunchPlan::prepare(&request("/bin/true"), policy::resolve(0).unwrap()).unwrap();
        assert!(plan
            .envp()
            .iter()
            .any(|entry| entry.as_bytes() == b"RUNBOX_PLAN_TEST=inherited"));
    }

    #[test]
    fn detects_shared_error_stream() {
        let mut req = request("/bin/true");
        req.output_file = Some(PathBuf::from("/tmp/out.txt"));
        req.error_file = Some(PathBuf::from("/tmp/out.txt"));
        let plan = LaunchPlan::prepare(&req, policy::resolve(0).unwrap()).unwrap();
        assert!(plan.shares_error_stream());

        req.error_file = Some(PathBuf::from("/tmp/err.txt"));
        let plan = LaunchPlan::prepare(&req, policy::resolve(0).unwrap()).unwrap();
        assert!(!plan.shares_error_stream());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn restrictive_policy_compiles_during_prepare() {
        let plan = LaunchPlan::prepare(&request("/bin/true"), policy::resolve(1).unwrap()).unwrap();
        assert!(plan.filter.is_active());
    }
}
