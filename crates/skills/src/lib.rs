//! Tool registry and hot-reloaded tool discovery for the agent sandbox.
//!
//! This crate provides:
//! - `ToolRegistry`: lock-free reads, atomically swapped tool sets
//! - Discovery of `@tool` entry points from scanned Python sources
//! - Script tools that run vetted sources inside a sandbox session
//! - A catalog of trusted, fully-qualified tools
//! - A debounced directory watcher driving reloads

pub mod catalog;
pub mod discovery;
pub mod registry;
pub mod script_tool;
pub mod watcher;

pub use catalog::{ToolCatalog, ToolFactory};
pub use discovery::{discover, load_file, tool_sources, DiscoveredTool, Discovery, ScanWarning};
pub use registry::{ReloadReport, ToolRegistration, ToolRegistry, ToolSet, ToolSummary};
pub use script_tool::{ScriptLoader, ScriptRuntime, ScriptTool, RUNNER};
pub use watcher::{watch, ToolWatcher};
