//! Per-session state shared by the backend implementations.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use agent_sandbox_core::{Error, Result, SandboxSession, SessionStatus};

use crate::fs_ops::WorkspaceFs;

/// Lock-free holder for a [`SessionStatus`].
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: SessionStatus) -> Self {
        Self(AtomicU8::new(encode(status)))
    }

    pub fn get(&self) -> SessionStatus {
        decode(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: SessionStatus) {
        self.0.store(encode(status), Ordering::Release);
    }

    /// Move `from` -> `to` only if the status is still `from`.
    pub fn transition(&self, from: SessionStatus, to: SessionStatus) -> bool {
        self.0
            .compare_exchange(encode(from), encode(to), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn encode(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Initializing => 0,
        SessionStatus::Ready => 1,
        SessionStatus::Busy => 2,
        SessionStatus::Failed => 3,
        SessionStatus::Destroyed => 4,
    }
}

fn decode(raw: u8) -> SessionStatus {
    match raw {
        0 => SessionStatus::Initializing,
        1 => SessionStatus::Ready,
        2 => SessionStatus::Busy,
        3 => SessionStatus::Failed,
        _ => SessionStatus::Destroyed,
    }
}

/// Session descriptor, workspace, status, and the per-session turn lock.
///
/// Every operation takes the turn lock first, so operations within one
/// session run one at a time and in the order they were issued.
pub struct SessionCore {
    pub session: SandboxSession,
    pub fs: WorkspaceFs,
    pub status: StatusCell,
    turn: Mutex<()>,
}

impl SessionCore {
    pub fn new(session: SandboxSession, fs: WorkspaceFs) -> Self {
        Self {
            session,
            fs,
            status: StatusCell::new(SessionStatus::Ready),
            turn: Mutex::new(()),
        }
    }

    /// Wait for this session's turn.
    pub async fn turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    /// Fail fast on sessions that can no longer accept work.
    pub fn ensure_usable(&self) -> Result<()> {
        match self.status.get() {
            SessionStatus::Destroyed => Err(Error::SessionDestroyed(self.session.id.to_string())),
            SessionStatus::Failed => Err(Error::backend_unavailable(format!(
                "session {} lost its backend",
                self.session.id
            ))),
            _ => Ok(()),
        }
    }

    /// Run a file operation on the blocking pool, in turn.
    pub async fn fs_op<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&WorkspaceFs) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _turn = self.turn().await;
        self.ensure_usable()?;
        let fs = self.fs.clone();
        tokio::task::spawn_blocking(move || op(&fs))
            .await
            .map_err(|e| Error::internal(format!("file operation panicked: {}", e)))?
    }

    /// Mark the session failed after its backend became unreachable.
    pub fn fail(&self, reason: &str) -> Error {
        self.status.set(SessionStatus::Failed);
        tracing::error!(session_id = %self.session.id, reason = %reason, "Session backend unavailable");
        Error::backend_unavailable(reason.to_string())
    }
}
