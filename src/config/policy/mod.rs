//! Policy registry
//!
//! Static syscall allow-list profiles keyed by numeric identifier.

pub mod registry;

pub use registry::*;
