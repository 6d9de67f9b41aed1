//! In-memory backend for tests that must not spawn processes or need Docker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use agent_sandbox_core::{
    BackendKind, CommandLine, EditOutcome, Error, ExecutionBackend, ExecutionResult, FileInfo,
    GrepMatch, Result, SandboxSession, SessionId, SessionStatus, WriteOutcome,
};

use crate::factory::BackendProvider;
use crate::session::StatusCell;

/// Scripted `execute` responses and an in-memory file map.
///
/// Every argv passed to `execute` is recorded in `executed`.
pub struct MockBackend {
    session: SandboxSession,
    status: StatusCell,
    pub responses: Arc<Mutex<Vec<ExecutionResult>>>,
    pub files: Arc<Mutex<BTreeMap<String, String>>>,
    pub executed: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockBackend {
    /// Mock with predefined execute responses, consumed in order.
    pub fn new(responses: Vec<ExecutionResult>) -> Self {
        Self::with_id(SessionId::generate(), responses)
    }

    pub fn with_id(id: SessionId, responses: Vec<ExecutionResult>) -> Self {
        Self {
            session: SandboxSession::new(id, "/mock", BackendKind::Local),
            status: StatusCell::new(SessionStatus::Ready),
            responses: Arc::new(Mutex::new(responses)),
            files: Default::default(),
            executed: Default::default(),
        }
    }

    /// A successful result with the given output.
    pub fn ok(output: impl Into<String>) -> ExecutionResult {
        ExecutionResult {
            output: output.into(),
            exit_code: Some(0),
            truncated: false,
            timed_out: false,
            elapsed: Duration::from_millis(1),
        }
    }

    /// Force the status, e.g. to simulate a lost backend.
    pub fn set_status(&self, status: SessionStatus) {
        self.status.set(status);
    }

    fn check(&self) -> Result<()> {
        match self.status.get() {
            SessionStatus::Destroyed => Err(Error::SessionDestroyed(self.session.id.to_string())),
            SessionStatus::Failed => Err(Error::backend_unavailable("mock backend failed")),
            _ => Ok(()),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Root-relative key; `..` never leaves the mock root.
fn key(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::PathEscape {
                        path: path.to_string(),
                        root: "/mock".into(),
                    });
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

fn under(base: &str, path: &str) -> bool {
    base.is_empty() || path == base || path.starts_with(&format!("{}/", base))
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn session(&self) -> &SandboxSession {
        &self.session
    }

    fn status(&self) -> SessionStatus {
        self.status.get()
    }

    async fn execute(
        &self,
        command: CommandLine,
        _timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        self.check()?;
        let argv = command.into_argv()?;
        self.executed.lock().await.push(argv);

        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            Ok(Self::ok("[mock] command executed"))
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn read(&self, path: &str, offset: usize, limit: usize) -> Result<String> {
        self.check()?;
        let files = self.files.lock().await;
        let content = files
            .get(&key(path)?)
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(content
            .lines()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(idx, line)| format!("{:>6}\t{}", idx + 1, line))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn write(&self, path: &str, content: &str) -> Result<WriteOutcome> {
        self.check()?;
        let key = key(path)?;
        self.files.lock().await.insert(key.clone(), content.to_string());
        Ok(WriteOutcome {
            path: key,
            written: content.len(),
        })
    }

    async fn edit(
        &self,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<EditOutcome> {
        self.check()?;
        let key = key(path)?;
        let mut files = self.files.lock().await;
        let content = files
            .get_mut(&key)
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        let found = if old.is_empty() { 0 } else { content.matches(old).count() };
        if found == 0 {
            return Err(Error::EditNoMatch {
                path: path.to_string(),
                old: old.to_string(),
            });
        }
        let replacements = if replace_all {
            *content = content.replace(old, new);
            found
        } else {
            *content = content.replacen(old, new, 1);
            1
        };
        Ok(EditOutcome { path: key, replacements })
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.check()?;
        let base = key(path)?;
        let files = self.files.lock().await;
        Ok(files
            .iter()
            .filter(|(name, _)| under(&base, name) && name.as_str() != base)
            .map(|(name, content)| FileInfo {
                path: name.clone(),
                is_dir: false,
                size: content.len() as u64,
            })
            .collect())
    }

    async fn glob(&self, pattern: &str, path: &str) -> Result<Vec<FileInfo>> {
        self.check()?;
        let compiled = glob::Pattern::new(pattern)
            .map_err(|e| Error::invalid_request(format!("invalid glob pattern: {}", e)))?;
        let base = key(path)?;
        let files = self.files.lock().await;
        Ok(files
            .iter()
            .filter(|(name, _)| under(&base, name))
            .filter(|(name, _)| {
                let rel = name
                    .strip_prefix(&base)
                    .unwrap_or(name)
                    .trim_start_matches('/');
                compiled.matches(rel)
            })
            .map(|(name, content)| FileInfo {
                path: name.clone(),
                is_dir: false,
                size: content.len() as u64,
            })
            .collect())
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        self.check()?;
        let regex = regex::Regex::new(pattern)
            .map_err(|e| Error::invalid_request(format!("invalid regex: {}", e)))?;
        let base = key(path)?;
        let files = self.files.lock().await;
        let mut matches = Vec::new();
        for (name, content) in files.iter().filter(|(name, _)| under(&base, name)) {
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        path: name.clone(),
                        line: idx + 1,
                        text: line.to_string(),
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn destroy(&self) -> Result<()> {
        self.status.set(SessionStatus::Destroyed);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Hands out fresh [`MockBackend`]s, all sharing one response script.
#[derive(Default)]
pub struct MockProvider {
    pub responses: Arc<Mutex<Vec<ExecutionResult>>>,
    pub created: Arc<Mutex<Vec<Arc<MockBackend>>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<ExecutionResult>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            created: Default::default(),
        }
    }
}

#[async_trait]
impl BackendProvider for MockProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn create(&self, id: SessionId) -> Result<Arc<dyn ExecutionBackend>> {
        let mut backend = MockBackend::with_id(id, Vec::new());
        backend.responses = self.responses.clone();
        let backend = Arc::new(backend);
        self.created.lock().await.push(backend.clone());
        Ok(backend)
    }
}
