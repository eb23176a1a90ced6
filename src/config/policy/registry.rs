/// Syscall policy registry
///
/// A closed, immutable table of named profiles. Adding a profile means a new
/// `PolicyId` variant (with its `TryFrom` and `Display` arms), an entry in
/// `POLICIES`, a bumped `MAX_POLICY`, and a matching `cli::PolicyArg`.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers of the registered policies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PolicyId {
    /// No syscall filter
    #[serde(rename = "default")]
    Default = 0,
    /// Compiled single-binary programs (C/C++ and friends)
    #[serde(rename = "cxx")]
    CxxProgram = 1,
}

/// One past the largest registered identifier
pub const MAX_POLICY: i32 = 2;

impl PolicyId {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for PolicyId {
    type Error = i32;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(PolicyId::Default),
            1 => Ok(PolicyId::CxxProgram),
            other => Err(other),
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyId::Default => f.write_str("default"),
            PolicyId::CxxProgram => f.write_str("cxx"),
        }
    }
}

/// Syscall allow-list plus exec/IO restrictions
#[derive(Debug, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub id: PolicyId,
    pub name: &'static str,
    /// Syscall names allowed unconditionally. Empty means no filter at all.
    pub allowed_syscalls: &'static [&'static str],
    /// Only allow execve of the resolved program path
    pub restrict_execve: bool,
    /// Allow open/openat/dup* freely; otherwise only read-only opens
    pub allow_io: bool,
}

impl SandboxPolicy {
    /// A policy with an empty allow-list installs no filter
    pub fn is_unfiltered(&self) -> bool {
        self.allowed_syscalls.is_empty()
    }

    pub fn allows(&self, syscall: &str) -> bool {
        self.allowed_syscalls.contains(&syscall)
    }
}

const CXX_PROGRAM_SYSCALLS: &[&str] = &[
    "access",
    "arch_prctl",
    "brk",
    "clock_gettime",
    "clock_nanosleep",
    "close",
    "exit_group",
    "faccessat",
    "fcntl",
    "fstat",
    "futex",
    "flock",
    "getpid",
    "getrandom",
    "lseek",
    "mmap",
    "mprotect",
    "munmap",
    "newfstatat",
    "pread64",
    "prlimit64",
    "prctl",
    "pipe2",
    "read",
    "readlink",
    "readlinkat",
    "readv",
    "rseq",
    "set_robust_list",
    "set_tid_address",
    "write",
    "writev",
    "seccomp",
    "ioctl",
    "rt_sigprocmask",
];

static POLICIES: [SandboxPolicy; 2] = [
    SandboxPolicy {
        id: PolicyId::Default,
        name: "Default Policy",
        allowed_syscalls: &[],
        restrict_execve: false,
        allow_io: true,
    },
    SandboxPolicy {
        id: PolicyId::CxxProgram,
        name: "C/C++ Program Policy",
        allowed_syscalls: CXX_PROGRAM_SYSCALLS,
        restrict_execve: true,
        allow_io: true,
    },
];

/// Look up a policy by raw identifier. Unknown identifiers yield `None`.
pub fn resolve(id: i32) -> Option<&'static SandboxPolicy> {
    let id = PolicyId::try_from(id).ok()?;
    POLICIES.iter().find(|policy| policy.id == id)
}

pub fn is_known(id: i32) -> bool {
    resolve(id).is_some()
}

/// All registered policies in identifier order
pub fn policies() -> &'static [SandboxPolicy] {
    &POLICIES
}
