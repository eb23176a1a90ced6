//! Observability
//!
//! Run-scoped leveled diagnostics with a file sink and facade fallback.

pub mod run_log;
