//! Execution control
//!
//! Pre-fork planning, the type-state ordered child launcher, the wall-clock
//! monitor and the parent-side orchestrator.

pub mod executor;
pub mod monitor;
pub mod plan;
pub mod preexec;
