//! Shared foundations for the crib container runtime.
//!
//! Holds the error taxonomy, domain primitive types, fixed filesystem
//! layout constants, and the user-facing configuration model. Every other
//! crate in the workspace depends on this one and nothing else in it.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
