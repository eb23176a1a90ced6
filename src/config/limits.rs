//! Effective limit derivation
//!
//! Pure arithmetic over a [`SandboxRequest`]; computed once per run and never stored.

use crate::config::types::SandboxRequest;

/// Kernel-facing limit values derived from the caller's request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedLimits {
    /// Address-space ceiling in bytes, 0 for unlimited
    pub memory_hard: u64,
    /// CPU limit in whole seconds, 0 for unlimited
    pub cpu_seconds: u64,
}

impl ResolvedLimits {
    pub fn from_request(request: &SandboxRequest) -> Self {
        Self {
            memory_hard: effective_memory_hard(request.max_memory, request.memory_to_crash),
            cpu_seconds: effective_cpu_limit_seconds(request.max_cpu_time_ms),
        }
    }
}

/// Hard memory ceiling: an explicit memory-to-crash wins when it does not
/// undercut the soft limit, otherwise twice the soft limit.
pub fn effective_memory_hard(memory_soft: u64, memory_to_crash: u64) -> u64 {
    if memory_to_crash != 0 && (memory_soft == 0 || memory_to_crash >= memory_soft) {
        memory_to_crash
    } else if memory_soft == 0 {
        0
    } else {
        memory_soft.saturating_mul(2)
    }
}

/// Milliseconds rounded up to whole seconds
pub fn effective_cpu_limit_seconds(cpu_time_ms: u64) -> u64 {
    cpu_time_ms.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn memory_hard_defaults_to_double_soft() {
        assert_eq!(effective_memory_hard(128 * MB, 0), 256 * MB);
        assert_eq!(effective_memory_hard(1, 0), 2);
    }

    #[test]
    fn memory_hard_unlimited_without_soft() {
        assert_eq!(effective_memory_hard(0, 0), 0);
    }

    #[test]
    fn explicit_memory_to_crash_is_used() {
        assert_eq!(effective_memory_hard(128 * MB, 512 * MB), 512 * MB);
        assert_eq!(effective_memory_hard(128 * MB, 128 * MB), 128 * MB);
        assert_eq!(effective_memory_hard(0, 64 * MB), 64 * MB);
    }

    #[test]
    fn memory_to_crash_below_soft_falls_back() {
        assert_eq!(effective_memory_hard(128 * MB, 1), 256 * MB);
    }

    #[test]
    fn memory_hard_saturates() {
        assert_eq!(effective_memory_hard(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn cpu_limit_rounds_up() {
        assert_eq!(effective_cpu_limit_seconds(0), 0);
        assert_eq!(effective_cpu_limit_seconds(1), 1);
        assert_eq!(effective_cpu_limit_seconds(999), 1);
        assert_eq!(effective_cpu_limit_seconds(1000), 1);
        assert_eq!(effective_cpu_limit_seconds(1001), 2);
        assert_eq!(effective_cpu_limit_seconds(2500), 3);
    }

    #[test]
    fn resolved_from_request() {
        let request = SandboxRequest {
            max_memory: 64 * MB,
            max_cpu_time_ms: 1500,
            ..SandboxRequest::default()
        };
        let limits = ResolvedLimits::from_request(&request);
        assert_eq!(limits.memory_hard, 128 * MB);
        assert_eq!(limits.cpu_seconds, 2);
    }
}
