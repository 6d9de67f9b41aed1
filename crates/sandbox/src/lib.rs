//! Execution sandbox for agent commands and file operations.
//!
//! Every command and file operation an agent issues lands on an
//! [`ExecutionBackend`](agent_sandbox_core::ExecutionBackend) bound to one
//! session root, and every path passes the session's containment guard
//! first.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Tools (SandboxShellTool, etc.)        │
//! │    ↓ default session                   │
//! ├────────────────────────────────────────┤
//! │  SandboxManager (sessions, reaper)     │
//! │    ↓ BackendFactory                    │
//! ├────────────────────────────────────────┤
//! │  LocalBackend      │ ContainerBackend  │
//! │  host subprocess   │ bollard exec      │
//! │  process group     │ hardened container│
//! ├────────────────────────────────────────┤
//! │  WorkspaceFs + ContainmentGuard        │
//! │    <workspace_root>/<session_id>       │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use agent_sandbox::{BackendFactory, SandboxManager};
//!
//! let factory = Arc::new(BackendFactory::from_config(&config)?);
//! let manager = Arc::new(SandboxManager::new(factory, config.execution.idle_timeout()));
//!
//! let session = manager.get_or_create().await?;
//! let result = session.execute(["echo", "hello"].into(), None).await?;
//! ```

pub mod docker;
pub mod factory;
pub mod fs_ops;
pub mod local;
pub mod manager;
pub mod mock;
pub mod session;
pub mod tools;

pub use docker::{build_container_config, ContainerBackend};
pub use factory::{BackendFactory, BackendProvider};
pub use fs_ops::{WorkspaceFs, WorkspaceWalker};
pub use local::LocalBackend;
pub use manager::SandboxManager;
pub use mock::{MockBackend, MockProvider};
pub use tools::{
    builtin_tools, SandboxEditFileTool, SandboxGlobTool, SandboxGrepTool, SandboxListFilesTool,
    SandboxReadFileTool, SandboxShellTool, SandboxWriteFileTool,
};
