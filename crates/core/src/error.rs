//! Error types for the agent sandbox.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the sandbox's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the agent sandbox.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Containment Errors
    // =========================================================================
    #[error("Path escapes sandbox root: {path} is outside of {root}")]
    PathEscape { path: String, root: PathBuf },

    #[error("Access to protected path denied: {0}")]
    ProtectedPath(String),

    #[error("Malformed path: {0}")]
    MalformedPath(String),

    // =========================================================================
    // Security Scanning Errors
    // =========================================================================
    // Violations and load failures are recorded, not raised: see
    // `ImportViolation` and `ToolLoadError`.
    #[error("Syntax error in {file}: {message}")]
    Syntax { file: String, message: String },

    // =========================================================================
    // Execution Lifecycle Errors
    // =========================================================================
    // A timeout is an outcome, reported through `ExecutionResult::timed_out`.
    #[error("Execution backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Failed to create sandbox container: {0}")]
    ContainerCreation(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Session destroyed: {0}")]
    SessionDestroyed(String),

    // =========================================================================
    // File Operation Errors
    // =========================================================================
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("String not found in {path}: {old}")]
    EditNoMatch { path: String, old: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Untrusted namespace: {0}")]
    UntrustedNamespace(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a malformed path error.
    pub fn malformed_path(msg: impl Into<String>) -> Self {
        Self::MalformedPath(msg.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a backend unavailable error.
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create an execution failure.
    pub fn execution_failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error ends the affected session.
    ///
    /// The sandbox never retries these; a layer above decides whether to
    /// open a fresh session.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::SessionDestroyed(_))
    }

    /// Whether this error is a containment failure (escape, protected, malformed).
    pub fn is_containment(&self) -> bool {
        matches!(
            self,
            Self::PathEscape { .. } | Self::ProtectedPath(_) | Self::MalformedPath(_)
        )
    }
}
