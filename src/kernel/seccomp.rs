// Syscall filtering
// Compiles a registry policy into a deny-by-default BPF program. Compilation
// happens in the parent; loading happens in the child right before execve.

use crate::config::policy::SandboxPolicy;
use crate::config::types::{Result, SandboxError};
use crate::kernel::syscalls::syscall_number;
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use std::collections::BTreeMap;
use std::ffi::CStr;

/// Syscalls opened up when the policy allows general file I/O
const IO_SYSCALLS: &[&str] = &["open", "openat", "dup", "dup2", "dup3"];

/// A compiled filter, or nothing for unfiltered policies
pub struct PolicyFilter {
    policy: &'static SandboxPolicy,
    program: Option<BpfProgram>,
}

impl PolicyFilter {
    /// Compile `policy` for a subject that will be exec'd from `program_path`.
    ///
    /// When the policy restricts execve, the rule compares the first syscall
    /// argument with the address of `program_path`, so the very same buffer
    /// must be handed to execve.
    pub fn build(policy: &'static SandboxPolicy, program_path: &CStr) -> Result<Self> {
        if policy.is_unfiltered() {
            log::debug!("Policy '{}' installs no syscall filter", policy.name);
            return Ok(Self {
                policy,
                program: None,
            });
        }

        let arch: TargetArch = std::env::consts::ARCH.try_into().map_err(|_| {
            SandboxError::PolicyApplication(format!(
                "seccomp is not supported on {}",
                std::env::consts::ARCH
            ))
        })?;

        let rules = compile_rules(policy, program_path)?;
        let filter = SeccompFilter::new(
            rules,
            SeccompAction::KillProcess,
            SeccompAction::Allow,
            arch,
        )
        .map_err(|e| policy_error("Failed to create filter context", e))?;

        let program: BpfProgram = filter
            .try_into()
            .map_err(|e| policy_error("Failed to compile filter", e))?;

        log::debug!(
            "Compiled policy '{}' into {} BPF instructions",
            policy.name,
            program.len()
        );

        Ok(Self {
            policy,
            program: Some(program),
        })
    }

    pub fn policy(&self) -> &'static SandboxPolicy {
        self.policy
    }

    /// Whether loading this filter changes anything
    pub fn is_active(&self) -> bool {
        self.program.is_some()
    }

    pub fn instruction_count(&self) -> usize {
        self.program.as_ref().map_or(0, Vec::len)
    }

    /// Install the filter on the calling thread. Sets no_new_privs first.
    /// Irreversible: only call in the child that is about to exec.
    pub fn load(&self) -> Result<()> {
        let Some(program) = &self.program else {
            return Ok(());
        };
        seccompiler::apply_filter(program)
            .map_err(|e| policy_error("Failed to load filter", e))
    }
}

/// Compile and load in one step
pub fn apply(policy: &'static SandboxPolicy, program_path: &CStr) -> Result<()> {
    PolicyFilter::build(policy, program_path)?.load()
}

fn compile_rules(
    policy: &SandboxPolicy,
    program_path: &CStr,
) -> Result<BTreeMap<i64, Vec<SeccompRule>>> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();

    for name in policy.allowed_syscalls {
        match syscall_number(name) {
            Some(nr) => {
                rules.insert(nr, Vec::new());
            }
            None => log::debug!("Syscall '{}' does not exist on this architecture", name),
        }
    }

    let execve = required_syscall("execve")?;
    if policy.restrict_execve {
        let path_rule = rule(vec![condition(
            0,
            SeccompCmpArgLen::Qword,
            SeccompCmpOp::Eq,
            program_path.as_ptr() as u64,
        )?])?;
        rules.insert(execve, vec![path_rule]);
    } else {
        rules.insert(execve, Vec::new());
    }

    if policy.allow_io {
        for name in IO_SYSCALLS {
            if let Some(nr) = syscall_number(name) {
                rules.insert(nr, Vec::new());
            }
        }
    } else {
        let write_bits = (libc::O_WRONLY | libc::O_RDWR) as u64;
        // open(path, flags, mode) and openat(dirfd, path, flags, mode)
        for (name, flags_arg) in [("open", 1u8), ("openat", 2u8)] {
            let Some(nr) = syscall_number(name) else {
                continue;
            };
            let read_only = rule(vec![condition(
                flags_arg,
                SeccompCmpArgLen::Dword,
                SeccompCmpOp::MaskedEq(write_bits),
                0,
            )?])?;
            rules.insert(nr, vec![read_only]);
        }
    }

    Ok(rules)
}

fn required_syscall(name: &str) -> Result<i64> {
    syscall_number(name).ok_or_else(|| {
        SandboxError::PolicyApplication(format!(
            "syscall {} unknown on {}",
            name,
            std::env::consts::ARCH
        ))
    })
}

fn condition(
    arg: u8,
    len: SeccompCmpArgLen,
    op: SeccompCmpOp,
    value: u64,
) -> Result<SeccompCondition> {
    SeccompCondition::new(arg, len, op, value)
        .map_err(|e| policy_error("Failed to build rule condition", e))
}

fn rule(conditions: Vec<SeccompCondition>) -> Result<SeccompRule> {
    SeccompRule::new(conditions).map_err(|e| policy_error("Failed to build rule", e))
}

fn policy_error(context: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::PolicyApplication(format!("{}: {}", context, err))
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use crate::config::policy::{self, PolicyId};

    static READ_ONLY: SandboxPolicy = SandboxPolicy {
        id: PolicyId::CxxProgram,
        name: "read-only test policy",
        allowed_syscalls: &["read", "write", "exit_group"],
        restrict_execve: true,
        allow_io: false,
    };

    #[test]
    fn default_policy_compiles_to_nothing() {
        let policy = policy::resolve(PolicyId::Default.code()).unwrap();
        let filter = PolicyFilter::build(policy, c"/bin/true").unwrap();
        assert!(!filter.is_active());
        assert_eq!(filter.instruction_count(), 0);
        filter.load().unwrap();
    }

    #[test]
    fn default_policy_apply_is_noop() {
        let policy = policy::resolve(PolicyId::Default.code()).unwrap();
        apply(policy, c"/bin/true").unwrap();
    }

    #[test]
    fn restrictive_policy_compiles() {
        let policy = policy::resolve(PolicyId::CxxProgram.code()).unwrap();
        let filter = PolicyFilter::build(policy, c"/bin/true").unwrap();
        assert!(filter.is_active());
        assert!(filter.instruction_count() > policy.allowed_syscalls.len());
        assert_eq!(filter.policy().id, PolicyId::CxxProgram);
    }

    #[test]
    fn execve_rule_is_conditional() {
        let path = c"/usr/bin/env";
        let policy = policy::resolve(PolicyId::CxxProgram.code()).unwrap();
        let rules = compile_rules(policy, path).unwrap();
        assert_eq!(rules[&libc::SYS_execve].len(), 1);
        assert!(rules[&libc::SYS_read].is_empty());
        assert!(rules[&libc::SYS_openat].is_empty());
    }

    #[test]
    fn read_only_policy_masks_open_flags() {
        let rules = compile_rules(&READ_ONLY, c"/bin/true").unwrap();
        assert_eq!(rules[&libc::SYS_open].len(), 1);
        assert_eq!(rules[&libc::SYS_openat].len(), 1);
        assert!(!rules.contains_key(&libc::SYS_dup2));
        let filter = PolicyFilter::build(&READ_ONLY, c"/bin/true").unwrap();
        assert!(filter.is_active());
    }
}
