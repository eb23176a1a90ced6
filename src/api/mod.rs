//! Public entry points
//!
//! [`facade`] is the Rust API; [`abi`] exposes the same operations through a
//! fixed C layout for foreign callers.

pub mod abi;
pub mod facade;
