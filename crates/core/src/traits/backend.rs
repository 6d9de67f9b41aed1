//! Execution backend protocol.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    BackendKind, CommandLine, EditOutcome, ExecutionResult, FileInfo, GrepMatch, SandboxSession,
    SessionStatus, WriteOutcome,
};

/// Default number of lines returned by `read`.
pub const DEFAULT_READ_LIMIT: usize = 2000;

/// Common contract for running commands and touching files under containment.
///
/// Every implementation routes paths through the session's
/// [`ContainmentGuard`](crate::fs_policy::ContainmentGuard) before any
/// filesystem or process-table access, and serializes operations within a
/// session: a second call waits for the first to finish.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// The session this backend owns.
    fn session(&self) -> &SandboxSession;

    /// Current lifecycle state.
    fn status(&self) -> SessionStatus;

    /// Run a command as an argument vector, bounded by `timeout`
    /// (the configured default when `None`).
    ///
    /// A timeout is a normal outcome reported through `timed_out`.
    async fn execute(
        &self,
        command: CommandLine,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult>;

    /// Line-numbered slice of a file: `limit` lines from the 0-based `offset`.
    async fn read(&self, path: &str, offset: usize, limit: usize) -> Result<String>;

    /// Create or overwrite a file.
    async fn write(&self, path: &str, content: &str) -> Result<WriteOutcome>;

    /// Replace the first (or every) occurrence of `old` with `new`.
    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<EditOutcome>;

    /// Direct children of a directory.
    async fn list(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// Files below `path` matching a glob pattern.
    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<FileInfo>>;

    /// Lines below `path` matching a regular expression.
    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>>;

    /// Release every resource owned by the session. Idempotent.
    async fn destroy(&self) -> Result<()>;

    /// Check if the backend runtime is reachable.
    async fn is_available(&self) -> bool;
}
