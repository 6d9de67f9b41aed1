//! Bare-process execution backend.
//!
//! Commands run as direct child processes of the host, never through a
//! shell, with the session root as working directory and a scrubbed
//! environment. Each child leads its own process group so a timeout can take
//! down everything it spawned.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use agent_sandbox_core::config::ExecutionConfig;
use agent_sandbox_core::{
    BackendKind, CommandLine, ContainmentGuard, EditOutcome, Error, ExecutionBackend,
    ExecutionResult, FileInfo, GrepMatch, OutputBuffer, Result, SandboxSession, SessionId,
    SessionStatus, WriteOutcome,
};

use crate::fs_ops::WorkspaceFs;
use crate::session::SessionCore;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const READ_CHUNK: usize = 8 * 1024;
/// How long output is still collected after the direct child exits.
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// Runs commands as host subprocesses confined to the session root.
pub struct LocalBackend {
    core: SessionCore,
    output_limit: usize,
    default_timeout: Duration,
    remove_on_destroy: bool,
}

impl LocalBackend {
    /// Bind a new session to `root`, creating the directory if needed.
    pub fn new(
        id: SessionId,
        root: impl Into<PathBuf>,
        config: &ExecutionConfig,
        protected: &[String],
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let guard = ContainmentGuard::new(&root, protected)?;
        let session = SandboxSession::new(id, guard.root(), BackendKind::Local);

        tracing::info!(session_id = %session.id, root = %session.root.display(), "Local session ready");

        Ok(Self {
            core: SessionCore::new(session, WorkspaceFs::new(guard)),
            output_limit: config.output_limit_bytes,
            default_timeout: config.default_timeout(),
            remove_on_destroy: false,
        })
    }

    /// Delete the session root on `destroy`.
    pub fn with_cleanup(mut self, remove_on_destroy: bool) -> Self {
        self.remove_on_destroy = remove_on_destroy;
        self
    }

    async fn run(&self, argv: Vec<String>, timeout: Duration) -> Result<ExecutionResult> {
        let root = self.core.fs.root().to_path_buf();
        let path_env = std::env::var_os("PATH").unwrap_or_else(|| FALLBACK_PATH.into());

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&root)
            .env_clear()
            .env("PATH", path_env)
            .env("HOME", &root)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| Error::execution_failed(format!("failed to spawn '{}': {}", argv[0], e)))?;
        // Also the process group id; `child.id()` is gone once it is reaped.
        let pid = child.id();

        // Both pipes feed one channel so output keeps production order.
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let mut buffer = OutputBuffer::new(self.output_limit);
        let mut stragglers = false;
        let finished = tokio::time::timeout(timeout, async {
            let mut open = true;
            let status = loop {
                tokio::select! {
                    chunk = rx.recv(), if open => match chunk {
                        Some(chunk) => buffer.push(&chunk),
                        None => open = false,
                    },
                    status = child.wait() => break status,
                }
            };
            // Background processes may still hold the pipes after the direct
            // child exits; take what arrives within the grace period.
            if open {
                let grace = tokio::time::sleep(EXIT_GRACE);
                tokio::pin!(grace);
                loop {
                    tokio::select! {
                        chunk = rx.recv() => match chunk {
                            Some(chunk) => buffer.push(&chunk),
                            None => break,
                        },
                        _ = &mut grace => {
                            stragglers = true;
                            break;
                        }
                    }
                }
            }
            status
        })
        .await;

        match finished {
            Ok(status) => {
                let status = status?;
                if stragglers {
                    tracing::debug!(
                        session_id = %self.core.session.id,
                        program = %argv[0],
                        "Command exited with output still open, killing process group"
                    );
                    kill_group(pid, &mut child);
                    while let Ok(chunk) = rx.try_recv() {
                        buffer.push(&chunk);
                    }
                }
                let elapsed = started.elapsed();
                tracing::debug!(
                    session_id = %self.core.session.id,
                    program = %argv[0],
                    exit_code = ?status.code(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Command finished"
                );
                Ok(buffer.into_result(Some(exit_code(status)), false, elapsed))
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %self.core.session.id,
                    program = %argv[0],
                    timeout_secs = timeout.as_secs_f64(),
                    "Command timed out, killing process group"
                );
                kill_group(pid, &mut child);
                let _ = child.wait().await;
                while let Ok(chunk) = rx.try_recv() {
                    buffer.push(&chunk);
                }
                Ok(buffer.into_result(None, true, started.elapsed()))
            }
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(chunk[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code as i64,
        (None, Some(signal)) => 128 + signal as i64,
        (None, None) => -1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i64 {
    status.code().map(|c| c as i64).unwrap_or(-1)
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "killpg failed");
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>, child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
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

        if self.remove_on_destroy {
            let root = self.core.fs.root().to_path_buf();
            match tokio::fs::remove_dir_all(&root).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(session_id = %self.core.session.id, "Local session destroyed");
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.core.fs.root().is_dir()
    }
}
