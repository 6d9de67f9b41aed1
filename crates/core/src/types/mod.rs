//! Core type definitions for the agent sandbox.
//!
//! The data model exchanged between the agent runtime, the execution
//! backends, and the tool registry.

pub mod execution;
pub mod session;
pub mod tool;

pub use execution::*;
pub use session::*;
pub use tool::*;
