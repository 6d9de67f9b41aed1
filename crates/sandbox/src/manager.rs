//! Session lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use agent_sandbox_core::{
    BackendKind, CommandLine, EditOutcome, Error, ExecutionBackend, ExecutionResult, FileInfo,
    GrepMatch, Result, SandboxSession, SessionId, SessionStatus, WriteOutcome,
};

use crate::factory::BackendProvider;

struct SessionEntry {
    backend: Arc<dyn ExecutionBackend>,
    activity: Arc<Activity>,
}

/// When a session last finished an operation.
struct Activity {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        self.epoch
            .elapsed()
            .saturating_sub(Duration::from_millis(self.last_ms.load(Ordering::Relaxed)))
    }
}

/// Handle the manager gives out: delegates to the session's backend and
/// counts every finished operation as use.
struct TrackedBackend {
    inner: Arc<dyn ExecutionBackend>,
    activity: Arc<Activity>,
}

impl TrackedBackend {
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        self.activity.touch();
        if let Err(ref e) = result {
            let session_id = &self.inner.session().id;
            if e.is_fatal_to_session() {
                tracing::warn!(session_id = %session_id, error = %e, "Session can no longer be used");
            } else if e.is_containment() {
                tracing::warn!(session_id = %session_id, error = %e, "Blocked path outside the sandbox");
            }
        }
        result
    }
}

#[async_trait]
impl ExecutionBackend for TrackedBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn session(&self) -> &SandboxSession {
        self.inner.session()
    }

    fn status(&self) -> SessionStatus {
        self.inner.status()
    }

    async fn execute(
        &self,
        command: CommandLine,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        self.track(self.inner.execute(command, timeout).await)
    }

    async fn read(&self, path: &str, offset: usize, limit: usize) -> Result<String> {
        self.track(self.inner.read(path, offset, limit).await)
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteOutcome> {
        self.track(self.inner.write(path, content).await)
    }

    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<EditOutcome> {
        self.track(self.inner.edit(path, old, new, replace_all).await)
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.track(self.inner.list(path).await)
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<FileInfo>> {
        self.track(self.inner.glob(pattern, path).await)
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        self.track(self.inner.grep(pattern, path).await)
    }

    async fn destroy(&self) -> Result<()> {
        self.inner.destroy().await
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

/// Owns every live session and the backend provider that creates them.
///
/// Sessions run in parallel with each other; within one session the backend
/// serializes operations. A lazily created default session backs the
/// built-in tools and script tools.
pub struct SandboxManager {
    provider: Arc<dyn BackendProvider>,
    sessions: DashMap<SessionId, SessionEntry>,
    default_session: RwLock<Option<SessionId>>,
    idle_timeout: Duration,
}

impl SandboxManager {
    /// Create a new sandbox manager.
    pub fn new(provider: Arc<dyn BackendProvider>, idle_timeout: Duration) -> Self {
        Self {
            provider,
            sessions: DashMap::new(),
            default_session: RwLock::new(None),
            idle_timeout,
        }
    }

    /// Start a session. A fresh id is generated when none is given.
    pub async fn open(&self, id: Option<SessionId>) -> Result<Arc<dyn ExecutionBackend>> {
        let id = id.unwrap_or_else(SessionId::generate);
        if self.sessions.contains_key(&id) {
            return Err(Error::invalid_request(format!("session {} is already open", id)));
        }

        let inner = self.provider.create(id.clone()).await?;
        let activity = Arc::new(Activity::new());
        let backend: Arc<dyn ExecutionBackend> = Arc::new(TrackedBackend {
            inner: inner.clone(),
            activity: activity.clone(),
        });
        let inserted = match self.sessions.entry(id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    backend: backend.clone(),
                    activity,
                });
                true
            }
            Entry::Occupied(_) => false,
        };
        if !inserted {
            // Lost a race with a concurrent open of the same id
            inner.destroy().await?;
            return Err(Error::invalid_request(format!("session {} is already open", id)));
        }

        tracing::info!(session_id = %id, backend = %backend.kind(), "Session opened");
        Ok(backend)
    }

    /// Look up a live session and mark it used.
    ///
    /// Operations through the returned handle also count as use when they
    /// finish, so a long command does not leave its session looking idle.
    pub fn get(&self, id: &SessionId) -> Result<Arc<dyn ExecutionBackend>> {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.activity.touch();
                Ok(entry.backend.clone())
            }
            None => Err(Error::SessionDestroyed(id.to_string())),
        }
    }

    /// Destroy a session. Returns whether it was open.
    pub async fn close(&self, id: &SessionId) -> Result<bool> {
        let Some((_, entry)) = self.sessions.remove(id) else {
            return Ok(false);
        };
        entry.backend.destroy().await?;
        tracing::info!(session_id = %id, "Session closed");
        Ok(true)
    }

    /// The default session, created on first use.
    pub async fn get_or_create(&self) -> Result<Arc<dyn ExecutionBackend>> {
        // Fast path: the default session is still live
        {
            let guard = self.default_session.read().await;
            if let Some(backend) = guard.as_ref().and_then(|id| self.usable(id)) {
                return Ok(backend);
            }
        }

        // Slow path: create it
        let mut guard = self.default_session.write().await;
        // Double-check after acquiring write lock
        if let Some(backend) = guard.as_ref().and_then(|id| self.usable(id)) {
            return Ok(backend);
        }
        // A default session that lost its backend is replaced, not retried
        if let Some(stale) = guard.take() {
            if let Err(e) = self.close(&stale).await {
                tracing::warn!(session_id = %stale, error = %e, "Failed to close stale default session");
            }
        }

        let backend = self.open(None).await?;
        *guard = Some(backend.session().id.clone());
        Ok(backend)
    }

    fn usable(&self, id: &SessionId) -> Option<Arc<dyn ExecutionBackend>> {
        self.get(id).ok().filter(|backend| backend.status().is_usable())
    }

    /// Ids of every live session.
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Destroy sessions idle for at least `idle_timeout`, plus any that were
    /// destroyed or lost their backend. Busy sessions are never reaped.
    /// Returns how many were destroyed.
    pub async fn reap_idle(&self) -> usize {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                let status = entry.backend.status();
                matches!(status, SessionStatus::Destroyed | SessionStatus::Failed)
                    || (status != SessionStatus::Busy
                        && entry.activity.idle_for() >= self.idle_timeout)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in idle {
            match self.close(&id).await {
                Ok(true) => {
                    tracing::info!(session_id = %id, "Reaped idle session");
                    reaped += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(session_id = %id, error = %e, "Failed to reap session"),
            }
        }
        reaped
    }

    /// Run `reap_idle` every `interval` until the manager is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.reap_idle().await;
            }
        })
    }

    /// Destroy every session.
    pub async fn shutdown(&self) {
        for id in self.sessions() {
            if let Err(e) = self.close(&id).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to close session on shutdown");
            }
        }
    }

    pub fn provider(&self) -> &Arc<dyn BackendProvider> {
        &self.provider
    }
}
