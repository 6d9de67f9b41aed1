//! Backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;

use agent_sandbox_core::config::{AppConfig, ContainerConfig, ExecutionConfig};
use agent_sandbox_core::{BackendKind, Error, ExecutionBackend, Result, SessionId};

use crate::docker::ContainerBackend;
use crate::local::LocalBackend;

/// Creates one backend per session.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Variant this provider creates.
    fn kind(&self) -> BackendKind;

    /// Create a backend bound to a fresh session.
    async fn create(&self, id: SessionId) -> Result<Arc<dyn ExecutionBackend>>;
}

/// Picks Local or Container from `execution.backend`.
///
/// Callers only ever see `dyn ExecutionBackend`. Each session's workspace is
/// `<workspace_root>/<session_id>` and is removed when the session is
/// destroyed.
pub struct BackendFactory {
    execution: ExecutionConfig,
    container: ContainerConfig,
    protected: Vec<String>,
    docker: Option<Docker>,
}

impl BackendFactory {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let docker = match config.execution.backend {
            BackendKind::Local => None,
            BackendKind::Container => Some(Docker::connect_with_local_defaults().map_err(|e| {
                Error::backend_unavailable(format!("Failed to connect to Docker daemon: {}", e))
            })?),
        };

        Ok(Self {
            execution: config.execution.clone(),
            container: config.container.clone(),
            protected: config.security.protected_paths.clone(),
            docker,
        })
    }

    /// Workspace directory for a session.
    pub fn workspace_for(&self, id: &SessionId) -> PathBuf {
        self.execution.workspace_root.join(id.as_str())
    }
}

#[async_trait]
impl BackendProvider for BackendFactory {
    fn kind(&self) -> BackendKind {
        self.execution.backend
    }

    async fn create(&self, id: SessionId) -> Result<Arc<dyn ExecutionBackend>> {
        let root = self.workspace_for(&id);
        match (self.execution.backend, &self.docker) {
            (BackendKind::Local, _) => {
                let backend = LocalBackend::new(id, root, &self.execution, &self.protected)?
                    .with_cleanup(true);
                Ok(Arc::new(backend))
            }
            (BackendKind::Container, Some(docker)) => {
                let backend = ContainerBackend::create(
                    docker.clone(),
                    id,
                    root,
                    &self.execution,
                    &self.container,
                    &self.protected,
                )
                .await?
                .with_cleanup(true);
                Ok(Arc::new(backend))
            }
            (BackendKind::Container, None) => {
                Err(Error::backend_unavailable("no Docker client configured"))
            }
        }
    }
}
