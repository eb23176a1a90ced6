// OS resource limits applied in the child before the filter is loaded

use crate::config::limits::ResolvedLimits;
use crate::config::types::{Result, SandboxError, SandboxRequest};
use nix::sys::resource::{setrlimit, Resource};

/// The five limits a subject runs under. Zero means "leave unrestricted",
/// except `process_count` which is applied whenever it is non-negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlimitSet {
    pub address_space: u64,
    pub stack: u64,
    pub cpu_seconds: u64,
    pub process_count: i32,
    pub output_size: u64,
}

impl RlimitSet {
    pub fn from_request(request: &SandboxRequest, resolved: &ResolvedLimits) -> Self {
        Self {
            address_space: resolved.memory_hard,
            stack: request.max_stack,
            cpu_seconds: resolved.cpu_seconds,
            process_count: request.max_process_count,
            output_size: request.max_output_size,
        }
    }

    /// Apply every configured limit to the calling process
    pub fn apply(&self) -> Result<()> {
        if self.address_space != 0 {
            apply_rlimit_value(
                "RLIMIT_AS",
                Resource::RLIMIT_AS,
                self.address_space,
                self.address_space,
            )?;
        }
        if self.stack != 0 {
            apply_rlimit_value("RLIMIT_STACK", Resource::RLIMIT_STACK, self.stack, self.stack)?;
        }
        if self.cpu_seconds != 0 {
            // soft -> SIGXCPU, hard -> SIGKILL one second later
            apply_rlimit_value(
                "RLIMIT_CPU",
                Resource::RLIMIT_CPU,
                self.cpu_seconds,
                self.cpu_seconds.saturating_add(1),
            )?;
        }
        if self.process_count >= 0 {
            let count = self.process_count as u64;
            apply_rlimit_value("RLIMIT_NPROC", Resource::RLIMIT_NPROC, count, count)?;
        }
        if self.output_size != 0 {
            apply_rlimit_value(
                "RLIMIT_FSIZE",
                Resource::RLIMIT_FSIZE,
                self.output_size,
                self.output_size,
            )?;
        }
        Ok(())
    }
}

fn apply_rlimit_value(name: &str, resource: Resource, soft: u64, hard: u64) -> Result<()> {
    setrlimit(resource, soft as libc::rlim_t, hard as libc::rlim_t).map_err(|errno| {
        SandboxError::ResourceLimit(format!(
            "Failed to apply {}={} (hard={}): {}",
            name, soft, hard, errno
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_built_from_request_and_resolution() {
        let request = SandboxRequest {
            max_memory: 100,
            max_stack: 8 << 20,
            max_cpu_time_ms: 1500,
            max_process_count: 0,
            max_output_size: 4096,
            ..SandboxRequest::default()
        };
        let set = RlimitSet::from_request(&request, &ResolvedLimits::from_request(&request));
        assert_eq!(
            set,
            RlimitSet {
                address_space: 200,
                stack: 8 << 20,
                cpu_seconds: 2,
                process_count: 0,
                output_size: 4096,
            }
        );
    }

    #[test]
    fn unlimited_set_touches_nothing() {
        let set = RlimitSet {
            address_space: 0,
            stack: 0,
            cpu_seconds: 0,
            process_count: -1,
            output_size: 0,
        };
        set.apply().unwrap();
    }
}
