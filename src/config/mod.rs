//! Configuration and policy
//!
//! Request types, effective limit derivation, validation and the policy registry.

pub mod limits;
pub mod policy;
pub mod types;
pub mod validator;
