//! Verdict classification
//!
//! Derives outcomes as pure functions over immutable evidence.

pub mod verdict;
