/// Verdict classification
///
/// Pure function over the evidence the orchestrator collects after reaping,
/// compared against the limits as requested, before any defaults are resolved.
use crate::config::types::{SandboxOutcome, SandboxRequest, SandboxStatus};
use crate::kernel::signal::SETUP_FAILURE_SIGNAL;

/// Everything observed about one terminated subject
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunEvidence {
    pub exit_code: i32,
    /// Terminating signal, 0 for a normal exit
    pub signal: i32,
    pub wall_time_ms: u64,
    pub cpu_time_ms: u64,
    pub memory_bytes: u64,
}

/// Caller-declared limits the verdict is judged against (0 = unset)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LimitSnapshot {
    pub memory_soft: u64,
    pub cpu_time_ms: u64,
    pub real_time_ms: u64,
    pub output_size: u64,
}

impl LimitSnapshot {
    pub fn from_request(request: &SandboxRequest) -> Self {
        Self {
            memory_soft: request.max_memory,
            cpu_time_ms: request.max_cpu_time_ms,
            real_time_ms: request.max_real_time_ms,
            output_size: request.max_output_size,
        }
    }
}

/// Verdict classifier - pure function over evidence
pub struct VerdictClassifier;

impl VerdictClassifier {
    pub fn classify(evidence: &RunEvidence, limits: &LimitSnapshot) -> SandboxStatus {
        if evidence.signal == SETUP_FAILURE_SIGNAL as i32 {
            return SandboxStatus::InternalError;
        }

        let mut status = SandboxStatus::Success;
        if evidence.exit_code != 0 || evidence.signal != 0 {
            status = Self::classify_abnormal(evidence, limits);
        }

        // Measured usage against declared limits wins over signal heuristics.
        if limits.memory_soft != 0 && evidence.memory_bytes >= limits.memory_soft {
            SandboxStatus::MemoryLimitExceeded
        } else if limits.cpu_time_ms != 0 && evidence.cpu_time_ms >= limits.cpu_time_ms {
            SandboxStatus::CpuTimeLimitExceeded
        } else {
            status
        }
    }

    /// Best explanation for a non-zero exit or a signal
    fn classify_abnormal(evidence: &RunEvidence, limits: &LimitSnapshot) -> SandboxStatus {
        match evidence.signal {
            libc::SIGSEGV
                if limits.memory_soft != 0 && evidence.memory_bytes > limits.memory_soft =>
            {
                SandboxStatus::MemoryLimitExceeded
            }
            libc::SIGKILL
                if limits.real_time_ms != 0 && evidence.wall_time_ms >= limits.real_time_ms =>
            {
                SandboxStatus::RealTimeLimitExceeded
            }
            libc::SIGSYS => SandboxStatus::IllegalOperation,
            libc::SIGXCPU if limits.cpu_time_ms != 0 => SandboxStatus::CpuTimeLimitExceeded,
            libc::SIGXFSZ if limits.output_size != 0 => SandboxStatus::OutputLimitExceeded,
            _ => SandboxStatus::RuntimeError,
        }
    }

    /// Classify and assemble the caller-facing outcome
    pub fn outcome(evidence: &RunEvidence, limits: &LimitSnapshot) -> SandboxOutcome {
        SandboxOutcome {
            status: Self::classify(evidence, limits),
            exit_code: evidence.exit_code,
            signal: evidence.signal,
            cpu_time_ms: evidence.cpu_time_ms,
            real_time_ms: evidence.wall_time_ms,
            memory_bytes: evidence.memory_bytes,
        }
    }
}
