//! Container execution backend.
//!
//! One fresh container per session, created from the sandbox image with
//! hardening applied unconditionally:
//! - all capabilities dropped, no privilege escalation
//! - read-only root filesystem with tmpfs scratch for `/tmp` and `/home`
//! - memory, CPU, and pid limits fixed at creation
//! - network isolated unless the deployment opts in
//! - the session workspace bind-mounted read-write at `workdir`
//!
//! Commands enter through the runtime's exec API as an argument vector.
//! File operations act natively on the bind-mounted workspace through the
//! containment guard.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;

use agent_sandbox_core::config::{ContainerConfig, ExecutionConfig};
use agent_sandbox_core::{
    BackendKind, CommandLine, ContainmentGuard, EditOutcome, Error, ExecutionBackend,
    ExecutionResult, FileInfo, GrepMatch, OutputBuffer, Result, SandboxSession, SessionId,
    SessionStatus, WriteOutcome,
};

use crate::fs_ops::WorkspaceFs;
use crate::session::SessionCore;

/// Exit status of a process killed with SIGKILL.
const SIGKILL_EXIT: i64 = 137;
const KILL_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_GRACE_SECS: i64 = 5;

/// Label on every container this backend creates.
pub const MANAGED_BY_LABEL: (&str, &str) = ("managed-by", "agent-sandbox");

/// Docker container name for a session.
pub fn container_name(id: &SessionId) -> String {
    format!("agent-sandbox-{}", id)
}

/// Host-side directory bind-mounted as the session workspace.
///
/// When this process runs inside a container itself, `host_workspace_path`
/// names where the workspace root lives on the Docker host.
pub fn mount_source(config: &ContainerConfig, local_root: &Path, id: &SessionId) -> PathBuf {
    match config.host_workspace_path {
        Some(ref host) => host.join(id.as_str()),
        None => local_root.to_path_buf(),
    }
}

/// Container creation request with hardening and limits applied.
pub fn build_container_config(
    id: &SessionId,
    config: &ContainerConfig,
    mount_source: &Path,
) -> Config<String> {
    let scratch = format!("rw,noexec,nosuid,nodev,size={}", config.tmpfs_size_bytes);

    let host_config = HostConfig {
        memory: Some(config.memory_limit_bytes),
        // Equal to memory: no swap on top of the limit
        memory_swap: Some(config.memory_limit_bytes),
        cpu_quota: Some(config.cpu_quota),
        cpu_period: Some(config.cpu_period),
        pids_limit: Some(config.pids_limit),
        network_mode: Some(config.network.clone()),
        readonly_rootfs: Some(true),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        tmpfs: Some(HashMap::from([
            ("/tmp".to_string(), scratch.clone()),
            ("/home".to_string(), scratch),
        ])),
        mounts: Some(vec![Mount {
            target: Some(config.workdir.clone()),
            source: Some(mount_source.to_string_lossy().into_owned()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        }]),
        ulimits: Some(vec![bollard::models::ResourcesUlimits {
            name: Some("nofile".to_string()),
            soft: Some(1024),
            hard: Some(2048),
        }]),
        ..Default::default()
    };

    Config {
        image: Some(config.image.clone()),
        working_dir: Some(config.workdir.clone()),
        user: Some(config.user.clone()),
        cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
        env: Some(vec![format!("HOME={}", config.workdir)]),
        host_config: Some(host_config),
        labels: Some(HashMap::from([
            (MANAGED_BY_LABEL.0.to_string(), MANAGED_BY_LABEL.1.to_string()),
            ("agent-sandbox.session".to_string(), id.to_string()),
        ])),
        ..Default::default()
    }
}

/// Runs commands inside a per-session hardened container.
pub struct ContainerBackend {
    docker: Docker,
    core: SessionCore,
    container_id: String,
    user: String,
    workdir: String,
    output_limit: usize,
    default_timeout: Duration,
    remove_on_destroy: bool,
}

impl ContainerBackend {
    /// Create and start the session's container.
    ///
    /// An unreachable daemon is `BackendUnavailable`; anything else that
    /// stops the container from starting, including the creation timeout, is
    /// `ContainerCreation`. Neither is retried.
    pub async fn create(
        docker: Docker,
        id: SessionId,
        root: impl Into<PathBuf>,
        execution: &ExecutionConfig,
        container: &ContainerConfig,
        protected: &[String],
    ) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let guard = ContainmentGuard::new(&root, protected)?;

        if let Err(e) = docker.ping().await {
            return Err(Error::backend_unavailable(format!(
                "Docker daemon unreachable: {}",
                e
            )));
        }

        let name = container_name(&id);
        let source = mount_source(container, guard.root(), &id);
        let request = build_container_config(&id, container, &source);
        let creation_timeout = Duration::from_secs(container.creation_timeout_secs);

        let creation = async {
            docker
                .create_container(
                    Some(CreateContainerOptions {
                        name: name.as_str(),
                        platform: None,
                    }),
                    request,
                )
                .await
                .map_err(|e| Error::ContainerCreation(format!("create {}: {}", name, e)))?;
            docker
                .start_container::<String>(&name, None)
                .await
                .map_err(|e| Error::ContainerCreation(format!("start {}: {}", name, e)))?;
            Ok::<_, Error>(())
        };

        let outcome = match tokio::time::timeout(creation_timeout, creation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ContainerCreation(format!(
                "{} not running after {}s",
                name, container.creation_timeout_secs
            ))),
        };
        if let Err(e) = outcome {
            tracing::error!(session_id = %id, error = %e, "Sandbox container creation failed");
            remove_container_quietly(&docker, &name).await;
            return Err(e);
        }

        tracing::info!(
            session_id = %id,
            container_id = %name,
            image = %container.image,
            mount = %source.display(),
            "Sandbox container created and started"
        );

        let session = SandboxSession::new(id, guard.root(), BackendKind::Container)
            .with_container(name.clone());

        Ok(Self {
            docker,
            core: SessionCore::new(session, WorkspaceFs::new(guard)),
            container_id: name,
            user: container.user.clone(),
            workdir: container.workdir.clone(),
            output_limit: execution.output_limit_bytes,
            default_timeout: execution.default_timeout(),
            remove_on_destroy: false,
        })
    }

    /// Delete the session workspace on `destroy`.
    pub fn with_cleanup(mut self, remove_on_destroy: bool) -> Self {
        self.remove_on_destroy = remove_on_destroy;
        self
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    async fn run(&self, argv: Vec<String>, timeout: Duration) -> Result<ExecutionResult> {
        let started = Instant::now();
        // OOMKilled stays set once any earlier exec hit the limit
        let oom_before = self.oom_killed().await;
        let options = CreateExecOptions::<String> {
            cmd: Some(argv),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(self.workdir.clone()),
            user: Some(self.user.clone()),
            ..Default::default()
        };

        let exec = match self.docker.create_exec(&self.container_id, options).await {
            Ok(exec) => exec,
            Err(e) => return Err(self.classify(e).await),
        };
        let attached = match self.docker.start_exec(&exec.id, None).await {
            Ok(attached) => attached,
            Err(e) => return Err(self.classify(e).await),
        };
        let StartExecResults::Attached { mut output, .. } = attached else {
            return Err(Error::execution_failed("exec started detached"));
        };

        let mut buffer = OutputBuffer::new(self.output_limit);
        let collected = tokio::time::timeout(timeout, async {
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => buffer.push(&message),
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
        .await;

        match collected {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.classify(e).await),
            Err(_) => {
                tracing::warn!(
                    session_id = %self.core.session.id,
                    container_id = %self.container_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "Container exec timed out, killing sandbox processes"
                );
                self.kill_user_processes().await;
                return Ok(buffer.into_result(None, true, started.elapsed()));
            }
        }

        let inspect = match self.docker.inspect_exec(&exec.id).await {
            Ok(inspect) => inspect,
            Err(e) => return Err(self.classify(e).await),
        };
        let exit_code = inspect.exit_code.unwrap_or(-1);

        if exit_code == SIGKILL_EXIT && killed_by_memory_limit(oom_before, self.oom_killed().await) {
            tracing::warn!(container_id = %self.container_id, "Exec killed by the memory limit");
            return Err(Error::execution_failed("memory limit exceeded"));
        }

        let elapsed = started.elapsed();
        tracing::debug!(
            session_id = %self.core.session.id,
            exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "Container exec finished"
        );
        Ok(buffer.into_result(Some(exit_code), false, elapsed))
    }

    /// `kill -KILL -1` as the sandbox user: every process it owns except init.
    async fn kill_user_processes(&self) {
        let options = CreateExecOptions::<String> {
            cmd: Some(vec!["kill".into(), "-KILL".into(), "-1".into()]),
            user: Some(self.user.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let kill = async {
            let exec = self.docker.create_exec(&self.container_id, options).await?;
            if let StartExecResults::Attached { mut output, .. } =
                self.docker.start_exec(&exec.id, None).await?
            {
                while output.next().await.is_some() {}
            }
            Ok::<_, bollard::errors::Error>(())
        };
        match tokio::time::timeout(KILL_TIMEOUT, kill).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(container_id = %self.container_id, error = %e, "Kill exec failed"),
            Err(_) => tracing::warn!(container_id = %self.container_id, "Kill exec timed out"),
        }
    }

    async fn oom_killed(&self) -> bool {
        match self.docker.inspect_container(&self.container_id, None).await {
            Ok(info) => info
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Daemon gone: the session fails. Daemon fine: the command failed.
    async fn classify(&self, err: bollard::errors::Error) -> Error {
        if self.docker.ping().await.is_err() {
            self.core.fail(&format!("Docker daemon unreachable: {}", err))
        } else {
            Error::execution_failed(format!("container exec failed: {}", err))
        }
    }
}

/// Whether the container's OOM flag was raised during this exec.
fn killed_by_memory_limit(oom_before: bool, oom_after: bool) -> bool {
    oom_after && !oom_before
}

async fn remove_container_quietly(docker: &Docker, name: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(name, Some(options)).await {
        tracing::debug!(container_id = %name, error = %e, "Container cleanup skipped");
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn session(&self) -> &SandboxSession {
        &self.core.session
    }

    fn status(&self) -> SessionStatus {
        self.core.status.get()
    }

    async fn execute(
        &self,
        command: CommandLine,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let argv = command.into_argv()?;
        let _turn = self.core.turn().await;
        self.core.ensure_usable()?;

        self.core.status.transition(SessionStatus::Ready, SessionStatus::Busy);
        let result = self.run(argv, timeout.unwrap_or(self.default_timeout)).await;
        self.core.status.transition(SessionStatus::Busy, SessionStatus::Ready);
        result
    }

    async fn read(&self, path: &str, offset: usize, limit: usize) -> Result<String> {
        let path = path.to_string();
        self.core.fs_op(move |fs| fs.read(&path, offset, limit)).await
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteOutcome> {
        let (path, content) = (path.to_string(), content.to_string());
        self.core.fs_op(move |fs| fs.write(&path, &content)).await
    }

    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<EditOutcome> {
        let (path, old, new) = (path.to_string(), old.to_string(), new.to_string());
        self.core
            .fs_op(move |fs| fs.edit(&path, &old, &new, replace_all))
            .await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>> {
        let path = path.to_string();
        self.core.fs_op(move |fs| fs.list(&path)).await
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<FileInfo>> {
        let (pattern, path) = (pattern.to_string(), path.to_string());
        self.core.fs_op(move |fs| fs.glob(&pattern, &path)).await
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        let (pattern, path) = (pattern.to_string(), path.to_string());
        self.core.fs_op(move |fs| fs.grep(&pattern, &path)).await
    }

    async fn destroy(&self) -> Result<()> {
        let _turn = self.core.turn().await;
        if self.core.status.get() == SessionStatus::Destroyed {
            return Ok(());
        }
        self.core.status.set(SessionStatus::Destroyed);

        // Stop with a short grace period, then force-remove
        let _ = self
            .docker
            .stop_container(&self.container_id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await;
        let removed = self
            .docker
            .remove_container(
                &self.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await;

        if self.remove_on_destroy {
            let root = self.core.fs.root().to_path_buf();
            if let Err(e) = tokio::fs::remove_dir_all(&root).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(root = %root.display(), error = %e, "Workspace cleanup failed");
                }
            }
        }

        removed.map_err(|e| {
            Error::internal(format!(
                "Failed to remove sandbox container {}: {}",
                self.container_id, e
            ))
        })?;
        tracing::info!(
            session_id = %self.core.session.id,
            container_id = %self.container_id,
            "Sandbox container destroyed"
        );
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}
