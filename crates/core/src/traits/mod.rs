//! Core traits for the agent sandbox.
//!
//! - `backend`: the execution backend protocol (execute + file operations)
//! - `skills`: the `Tool` interface exposed to the agent runtime

pub mod backend;
pub mod skills;

pub use backend::*;
pub use skills::*;
