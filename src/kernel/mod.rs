//! Thin wrappers around Linux kernel primitives.
//!
//! Dependency direction: signal -> rlimit -> syscalls -> seccomp

pub mod rlimit;
pub mod seccomp;
pub mod signal;
pub mod syscalls;
