//! runbox: run untrusted programs under kernel-enforced limits
//!
//! One call forks a subject process, applies rlimits and a seccomp allow-list
//! in the child, watches the wall clock from the parent, and classifies the
//! termination into a single [`SandboxOutcome`].
//!
//! # Architecture
//!
//! ## Configuration & Policy ([`config`])
//! - [`config::types`]: Request/outcome types, status codes, errors
//! - [`config::limits`]: Effective memory-hard and CPU-second derivation
//! - [`config::validator`]: Pre-fork request validation
//! - [`config::policy`]: Static syscall policy registry
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimit`]: Resource limits applied in the child
//! - [`kernel::syscalls`]: Syscall name to number table
//! - [`kernel::seccomp`]: Policy to BPF compilation and loading
//! - [`kernel::signal`]: Setup-failure signal and signal descriptions
//!
//! ## Execution Control ([`exec`])
//! - [`exec::plan`]: Pre-fork launch preparation
//! - [`exec::preexec`]: Type-state enforced child setup ordering
//! - [`exec::monitor`]: Wall-clock watchdog thread
//! - [`exec::executor`]: Fork, wait, reap and classify
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::verdict`]: Pure outcome classification over evidence
//!
//! ## Observability ([`observability`])
//! - [`observability::run_log`]: Run-scoped leveled log with file sink
//!
//! ## Entry Points ([`api`])
//! - [`api::facade`]: Rust create/run API
//! - [`api::abi`]: Fixed-layout C ABI
//!
//! # Design Principles
//!
//! 1. **Validate before fork** - an invalid request never creates a process
//! 2. **Prepare in the parent** - the child only reads a prebuilt plan
//! 3. **Types enforce ordering** - limits, redirections, filter, exec
//! 4. **One failure path** - child setup errors are reported exactly once
//! 5. **Kernel as truth** - verdicts come from wait status and rusage

// Configuration & Policy
pub mod config;

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Verdict
pub mod verdict;

// Observability
pub mod observability;

// Entry points
pub mod api;

// CLI entrypoint wiring for the runbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use api::facade::{is_request_valid, start_sandbox, Sandbox};
pub use config::policy::{PolicyId, SandboxPolicy};
pub use config::types::*;
