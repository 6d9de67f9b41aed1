//! Core types, traits, and error definitions for the agent sandbox.
//!
//! This crate provides the building blocks shared by every layer of the
//! execution sandbox: the error taxonomy, configuration, the data model
//! exchanged with the agent runtime, the `ExecutionBackend` and `Tool`
//! contracts, and the containment guard every file path passes through.

pub mod config;
pub mod error;
pub mod fs_policy;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use fs_policy::ContainmentGuard;
pub use traits::*;
pub use types::*;
