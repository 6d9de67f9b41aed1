//! Tool-source governance for the agent sandbox.
//!
//! This crate provides:
//! - Security policy (banned modules, scan mode, trusted namespaces)
//! - Static import scanning of Python tool sources
//! - Logging setup

pub mod policy;
pub mod python;
pub mod scanner;
pub mod tracing_layer;

pub use policy::SecurityPolicy;
pub use python::{EntryPoint, ImportForm, ImportRef, ParsedModule};
pub use scanner::{evaluate, scan, scan_module, ScanDecision, ScanResult, VettedModule};
pub use tracing_layer::configure_tracing;
