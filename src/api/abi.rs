// C ABI
// Field order and widths are frozen; any change must bump SANDBOX_VERSION.
// Exported symbol names match the historical C header so existing
// dlsym/P-Invoke callers keep working.

use crate::api::facade;
use crate::config::types::{
    SandboxOutcome, SandboxRequest, SandboxStatus, MAX_ENVIRONMENT_VARIABLES, SANDBOX_VERSION,
};
use std::ffi::{CStr, OsStr};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

/// Request layout shared with C callers
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SandboxConfiguration {
    pub task_name: *const c_char,
    pub user_command: *const c_char,
    pub working_directory: *const c_char,
    pub environment_variables: *const *const c_char,
    pub environment_variables_count: u16,
    pub input_file: *const c_char,
    pub output_file: *const c_char,
    pub error_file: *const c_char,
    pub log_file: *const c_char,
    pub max_memory_to_crash: u64,
    pub max_memory: u64,
    pub max_stack: u64,
    pub max_cpu_time: u64,
    pub max_real_time: u64,
    pub max_output_size: u64,
    pub max_process_count: i32,
    pub policy: i32,
}

/// Result layout shared with C callers
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxResult {
    pub status: i32,
    pub exit_code: i32,
    pub signal: i32,
    pub cpu_time_usage: u64,
    pub real_time_usage: u64,
    pub memory_usage: u64,
}

impl From<SandboxOutcome> for SandboxResult {
    fn from(outcome: SandboxOutcome) -> Self {
        Self {
            status: outcome.status.code(),
            exit_code: outcome.exit_code,
            signal: outcome.signal,
            cpu_time_usage: outcome.cpu_time_ms,
            real_time_usage: outcome.real_time_ms,
            memory_usage: outcome.memory_bytes,
        }
    }
}

impl SandboxConfiguration {
    /// Pointer-level checks that cannot be expressed on the owned request
    ///
    /// # Safety
    /// A non-null `environment_variables` must hold
    /// `environment_variables_count` readable entries.
    unsafe fn check_pointers(&self) -> Result<(), &'static str> {
        if self.task_name.is_null() {
            return Err("TaskName is null");
        }
        if self.user_command.is_null() {
            return Err("UserCommand is null");
        }
        if usize::from(self.environment_variables_count) > MAX_ENVIRONMENT_VARIABLES {
            return Err("EnvironmentVariablesCount exceeds the maximum");
        }
        if self.environment_variables_count > 0 && self.environment_variables.is_null() {
            return Err("EnvironmentVariables is null but the count is non-zero");
        }
        for i in 0..usize::from(self.environment_variables_count) {
            if (*self.environment_variables.add(i)).is_null() {
                return Err("EnvironmentVariables contains a null entry");
            }
        }
        Ok(())
    }

    /// Copy into an owned request. Paths keep their exact bytes; text fields
    /// are decoded lossily.
    ///
    /// # Safety
    /// Every non-null pointer must reference a NUL-terminated string, and
    /// `environment_variables` must hold `environment_variables_count`
    /// non-null entries.
    pub unsafe fn to_request(&self) -> SandboxRequest {
        let environment = if self.environment_variables.is_null() {
            Vec::new()
        } else {
            (0..usize::from(self.environment_variables_count))
                .map(|i| opt_string(*self.environment_variables.add(i)).unwrap_or_default())
                .collect()
        };

        SandboxRequest {
            task_name: opt_string(self.task_name).unwrap_or_default(),
            command: opt_string(self.user_command).unwrap_or_default(),
            working_directory: opt_path(self.working_directory),
            environment,
            input_file: opt_path(self.input_file),
            output_file: opt_path(self.output_file),
            error_file: opt_path(self.error_file),
            log_file: opt_path(self.log_file),
            memory_to_crash: self.max_memory_to_crash,
            max_memory: self.max_memory,
            max_stack: self.max_stack,
            max_cpu_time_ms: self.max_cpu_time,
            max_real_time_ms: self.max_real_time,
            max_output_size: self.max_output_size,
            max_process_count: self.max_process_count,
            policy: self.policy,
        }
    }
}

unsafe fn opt_cstr<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr))
    }
}

unsafe fn opt_string(ptr: *const c_char) -> Option<String> {
    opt_cstr(ptr).map(|s| s.to_string_lossy().into_owned())
}

unsafe fn opt_path(ptr: *const c_char) -> Option<PathBuf> {
    opt_cstr(ptr).map(|s| PathBuf::from(OsStr::from_bytes(s.to_bytes())))
}

/// Validate a configuration without running it
///
/// # Safety
/// `config` must be null or point to a valid [`SandboxConfiguration`].
#[export_name = "IsSandboxConfigurationValid"]
pub unsafe extern "C" fn is_sandbox_configuration_valid(config: *const SandboxConfiguration) -> bool {
    let Some(config) = config.as_ref() else {
        return facade::is_request_valid(None);
    };
    if let Err(reason) = config.check_pointers() {
        log::debug!("Invalid sandbox configuration: {}", reason);
        return false;
    }
    let request = config.to_request();
    panic::catch_unwind(|| facade::is_request_valid(Some(&request))).unwrap_or(false)
}

/// Historical misspelled export kept for binary compatibility
///
/// # Safety
/// Same contract as [`is_sandbox_configuration_valid`].
#[export_name = "IsSandboxConfigurationVaild"]
pub unsafe extern "C" fn is_sandbox_configuration_vaild(config: *const SandboxConfiguration) -> bool {
    is_sandbox_configuration_valid(config)
}

/// Run a sandbox to completion, writing the outcome into `result`.
///
/// Returns `SANDBOX_STATUS_SUCCESS` (0) when the run completed, otherwise the
/// internal-error code.
///
/// # Safety
/// `config` must be null or valid per [`is_sandbox_configuration_valid`];
/// `result` must be null or point to writable memory for a [`SandboxResult`].
#[export_name = "StartSandbox"]
pub unsafe extern "C" fn start_sandbox(
    config: *const SandboxConfiguration,
    result: *mut SandboxResult,
) -> i32 {
    let internal_error = SandboxStatus::InternalError.code();

    let Some(result) = result.as_mut() else {
        return internal_error;
    };
    *result = SandboxResult::default();

    let Some(config) = config.as_ref() else {
        *result = SandboxOutcome::internal_error().into();
        return internal_error;
    };
    if let Err(reason) = config.check_pointers() {
        log::error!("Invalid sandbox configuration: {}", reason);
        *result = SandboxOutcome::internal_error().into();
        return internal_error;
    }

    let request = config.to_request();
    let (status, outcome) = panic::catch_unwind(AssertUnwindSafe(|| facade::start_sandbox(&request)))
        .unwrap_or_else(|_| (SandboxStatus::InternalError, SandboxOutcome::internal_error()));
    *result = outcome.into();
    status.code()
}

/// Packed library version, see `SANDBOX_VERSION`
#[export_name = "GetSandboxVersion"]
pub extern "C" fn sandbox_version() -> i32 {
    SANDBOX_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn blank() -> SandboxConfiguration {
        SandboxConfiguration {
            task_name: ptr::null(),
            user_command: ptr::null(),
            working_directory: ptr::null(),
            environment_variables: ptr::null(),
            environment_variables_count: 0,
            input_file: ptr::null(),
            output_file: ptr::null(),
            error_file: ptr::null(),
            log_file: ptr::null(),
            max_memory_to_crash: 0,
            max_memory: 0,
            max_stack: 0,
            max_cpu_time: 0,
            max_real_time: 0,
            max_output_size: 0,
            max_process_count: -1,
            policy: 0,
        }
    }

    #[test]
    fn converts_to_owned_request() {
        let env = [c"A=1".as_ptr(), c"B=2".as_ptr()];
        let config = SandboxConfiguration {
            task_name: c"abi".as_ptr(),
            user_command: c"/bin/echo hi".as_ptr(),
            output_file: c"/tmp/out".as_ptr(),
            environment_variables: env.as_ptr(),
            environment_variables_count: 2,
            max_memory: 4096,
            max_cpu_time: 1500,
            ..blank()
        };
        let request = unsafe { config.to_request() };
        assert_eq!(request.task_name, "abi");
        assert_eq!(request.command, "/bin/echo hi");
        assert_eq!(request.environment, vec!["A=1", "B=2"]);
        assert_eq!(request.output_file, Some(PathBuf::from("/tmp/out")));
        assert_eq!(request.input_file, None);
        assert_eq!(request.max_memory, 4096);
        assert_eq!(request.max_cpu_time_ms, 1500);
        assert_eq!(request.max_process_count, -1);
    }

    #[test]
    fn paths_keep_non_utf8_bytes() {
        let config = SandboxConfiguration {
            task_name: c"abi".as_ptr(),
            user_command: c"/bin/true".as_ptr(),
            output_file: c"/tmp/out\xff.txt".as_ptr(),
            working_directory: c"/tmp/dir\xfe".as_ptr(),
            ..blank()
        };
        let request = unsafe { config.to_request() };
        assert_eq!(
            request.output_file.unwrap().as_os_str().as_bytes(),
            b"/tmp/out\xff.txt"
        );
        assert_eq!(
            request.working_directory.unwrap().as_os_str().as_bytes(),
            b"/tmp/dir\xfe"
        );
    }

    #[test]
    fn rejects_null_environment_entry() {
        let env = [c"A=1".as_ptr(), ptr::null()];
        let config = SandboxConfiguration {
            task_name: c"abi".as_ptr(),
            user_command: c"/bin/true".as_ptr(),
            environment_variables: env.as_ptr(),
            environment_variables_count: 2,
            ..blank()
        };
        assert!(!unsafe { is_sandbox_configuration_valid(&config) });

        let mut result = SandboxResult::default();
        assert_eq!(unsafe { start_sandbox(&config, &mut result) }, 0xFFFF);
        assert_eq!(result.status, 0xFFFF);

        let counted = SandboxConfiguration {
            environment_variables_count: 1,
            ..config
        };
        assert!(unsafe { is_sandbox_configuration_valid(&counted) });
    }

    #[test]
    fn rejects_null_pointers() {
        assert!(!unsafe { is_sandbox_configuration_valid(ptr::null()) });

        let mut config = blank();
        assert!(!unsafe { is_sandbox_configuration_valid(&config) });

        config.task_name = c"abi".as_ptr();
        config.user_command = c"/bin/true".as_ptr();
        assert!(unsafe { is_sandbox_configuration_valid(&config) });
        assert!(unsafe { is_sandbox_configuration_vaild(&config) });

        config.environment_variables_count = 1;
        assert!(!unsafe { is_sandbox_configuration_valid(&config) });

        config.environment_variables_count = (MAX_ENVIRONMENT_VARIABLES + 1) as u16;
        assert!(!unsafe { is_sandbox_configuration_valid(&config) });
    }

    #[test]
    fn start_rejects_null_arguments() {
        let mut result = SandboxResult::default();
        let status = unsafe { start_sandbox(ptr::null(), &mut result) };
        assert_eq!(status, 0xFFFF);
        assert_eq!(result.status, 0xFFFF);

        let config = blank();
        assert_eq!(unsafe { start_sandbox(&config, ptr::null_mut()) }, 0xFFFF);
    }

    #[test]
    fn outcome_maps_into_result() {
        let outcome = SandboxOutcome {
            status: SandboxStatus::IllegalOperation,
            exit_code: 0,
            signal: libc::SIGSYS,
            cpu_time_ms: 3,
            real_time_ms: 9,
            memory_bytes: 1 << 20,
        };
        let result = SandboxResult::from(outcome);
        assert_eq!(result.status, 7);
        assert_eq!(result.signal, libc::SIGSYS);
        assert_eq!(result.real_time_usage, 9);
        assert_eq!(result.memory_usage, 1 << 20);
    }

    #[test]
    fn version_export() {
        assert_eq!(sandbox_version(), 0x010302);
    }
}
