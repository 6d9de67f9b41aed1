use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Types
// =============================================================================

/// Unique identifier for a sandbox session.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh session id.
    pub fn generate() -> Self {
        Self(format!("sbx-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which execution backend owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Subprocesses on the host, confined to the session root.
    Local,
    /// One hardened container per session.
    Container,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Container => "container",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a sandbox session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Backend resources are being created.
    Initializing,
    /// Idle and accepting operations.
    Ready,
    /// An execution is in flight.
    Busy,
    /// The backend became unreachable; every later operation fails.
    Failed,
    /// Resources released. Terminal.
    Destroyed,
}

impl SessionStatus {
    /// Whether the session can still accept operations.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ready | Self::Busy)
    }
}

/// One execution context bound to a root directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSession {
    pub id: SessionId,
    /// Confinement boundary for every path this session touches.
    pub root: PathBuf,
    pub backend: BackendKind,
    /// Live container, for the container backend.
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SandboxSession {
    pub fn new(id: SessionId, root: impl Into<PathBuf>, backend: BackendKind) -> Self {
        Self {
            id,
            root: root.into(),
            backend,
            container_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sbx-"));
    }

    #[test]
    fn test_status_usability() {
        assert!(SessionStatus::Ready.is_usable());
        assert!(SessionStatus::Busy.is_usable());
        assert!(!SessionStatus::Failed.is_usable());
        assert!(!SessionStatus::Destroyed.is_usable());
        assert!(!SessionStatus::Initializing.is_usable());
    }

    #[test]
    fn test_backend_kind_serde() {
        let kind: BackendKind = serde_json::from_str("\"container\"").unwrap();
        assert_eq!(kind, BackendKind::Container);
        assert_eq!(BackendKind::Local.to_string(), "local");
    }
}
