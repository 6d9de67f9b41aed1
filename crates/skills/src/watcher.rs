//! Hot reload of the tool directory.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use agent_sandbox_core::{Error, Result};

use crate::registry::ToolRegistry;

/// Keeps the directory watch and its reload loop alive.
///
/// Dropping the handle stops both.
pub struct ToolWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ToolWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whether an event can change the set of tool sources.
pub fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.extension().is_some_and(|ext| ext == "py"))
}

/// Wait for a burst of signals to go quiet for `window`, then call
/// `on_quiet` once. Returns when the sender side is gone.
pub async fn debounce_loop<F, Fut>(mut rx: mpsc::UnboundedReceiver<()>, window: Duration, mut on_quiet: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    on_quiet().await;
                    return;
                }
                Err(_) => break,
            }
        }
        on_quiet().await;
    }
}

/// Watch `dir` and reload `registry` once per quiet window.
///
/// The directory is created if missing.
pub fn watch(registry: Arc<ToolRegistry>, dir: &Path, debounce: Duration) -> Result<ToolWatcher> {
    std::fs::create_dir_all(dir)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_relevant(&event) {
                tracing::debug!(paths = ?event.paths, kind = ?event.kind, "Tool source changed");
                let _ = tx.send(());
            }
        }
        Err(e) => tracing::error!(error = %e, "Tool watcher error"),
    })
    .map_err(|e| Error::internal(format!("failed to create tool watcher: {}", e)))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::internal(format!("failed to watch {}: {}", dir.display(), e)))?;

    let task = tokio::spawn(debounce_loop(rx, debounce, move || {
        let registry = registry.clone();
        async move {
            match registry.reload().await {
                Ok(report) => tracing::info!(
                    tools = report.count,
                    errors = report.errors.len(),
                    "Hot reload finished"
                ),
                Err(e) => tracing::error!(error = %e, "Hot reload failed"),
            }
        }
    }));

    tracing::info!(dir = %dir.display(), debounce_ms = debounce.as_millis() as u64, "Watching tool directory");
    Ok(ToolWatcher {
        _watcher: watcher,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_relevant_events() {
        assert!(is_relevant(&event(EventKind::Create(CreateKind::File), "tools/a.py")));
        assert!(is_relevant(&event(EventKind::Modify(ModifyKind::Any), "tools/a.py")));
        assert!(!is_relevant(&event(EventKind::Modify(ModifyKind::Any), "tools/a.txt")));
        assert!(!is_relevant(&event(EventKind::Access(AccessKind::Any), "tools/a.py")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_reload() {
        let (tx, rx) = mpsc::unbounded_channel();
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = reloads.clone();
        let task = tokio::spawn(debounce_loop(rx, Duration::from_millis(500), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        for _ in 0..5 {
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(reloads.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(reloads.load(Ordering::SeqCst), 2);

        drop(tx);
        task.await.unwrap();
        assert_eq!(reloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_burst_flushed_on_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = reloads.clone();
        tx.send(()).unwrap();
        drop(tx);

        debounce_loop(rx, Duration::from_millis(500), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
    }
}
